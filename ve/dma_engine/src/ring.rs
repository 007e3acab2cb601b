// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The hardware descriptor ring: a fixed-size circular buffer of transfer
//! descriptors shared with the accelerator, addressed through the
//! byte-offset [`ve_hal::RegisterIo`] primitive.
//!
//! `HwDescRing` drives [`ve_hal::ring_layout`]'s offset scheme. Nothing above
//! it (`Engine`) knows or cares where the control-status register, the
//! software write pointer, or an individual descriptor's fields live in
//! register space.

use std::sync::Arc;
use ve_hal::ring_layout::{self as layout, Space};
use ve_hal::RegisterIo;

/// One hardware-sized transfer, ready to be written into a descriptor slot.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Descriptor {
    pub src_space: Space,
    pub src_pid: i32,
    pub src_phys: u64,
    pub dst_space: Space,
    pub dst_pid: i32,
    pub dst_phys: u64,
    pub length: u64,
    pub skip_prot_check: bool,
}

/// Outcome of a retired descriptor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Retired {
    Ok,
    Error,
}

pub(crate) struct HwDescRing {
    regs: Arc<dyn RegisterIo>,
    capacity: usize,
    /// Next slot index this side will write into. Mirrors the hardware's
    /// write-pointer register; re-derived from it on `new` so a restart
    /// observes whatever the hardware last reported.
    write_ptr: usize,
    /// Last read-pointer value this side has already drained.
    drained_ptr: usize,
}

impl HwDescRing {
    pub(crate) fn new(regs: Arc<dyn RegisterIo>, capacity: usize) -> Self {
        assert!(capacity > 0, "descriptor ring must have at least one slot");
        let regs_ref = regs.as_ref();
        regs_ref.write_u32(layout::CTL_STATUS_OFFSET, layout::CTL_STOP);
        for slot in 0..capacity {
            regs_ref.write_u32(layout::slot_offset(slot) + layout::F_FLAGS, 0);
            regs_ref.write_u32(layout::slot_offset(slot) + layout::F_RESULT, layout::RESULT_PENDING);
        }
        regs_ref.write_u32(layout::WRITE_PTR_OFFSET, 0);
        regs_ref.fence();
        regs_ref.write_u32(layout::CTL_STATUS_OFFSET, layout::CTL_START);
        Self {
            regs,
            capacity,
            write_ptr: 0,
            drained_ptr: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// The slot the next `post` call will write into.
    pub(crate) fn next_slot(&self) -> usize {
        self.write_ptr % self.capacity
    }

    /// Writes `desc` into the next free slot and rings the doorbell. Callers
    /// must only do this once `Engine`'s own accounting confirms the slot is
    /// free (`used_count < capacity`); the ring itself does not re-check.
    pub(crate) fn post(&mut self, desc: &Descriptor) -> usize {
        let slot = self.next_slot();
        let base = layout::slot_offset(slot);
        let r = self.regs.as_ref();
        r.write_u32(base + layout::F_SRC_KIND, desc.src_space.tag());
        r.write_u32(base + layout::F_SRC_PID, desc.src_pid as u32);
        r.write_u64(base + layout::F_SRC_ADDR, desc.src_phys);
        r.write_u32(base + layout::F_DST_KIND, desc.dst_space.tag());
        r.write_u32(base + layout::F_DST_PID, desc.dst_pid as u32);
        r.write_u64(base + layout::F_DST_ADDR, desc.dst_phys);
        r.write_u64(base + layout::F_LENGTH, desc.length);
        r.write_u32(base + layout::F_RESULT, layout::RESULT_PENDING);
        let mut flags = layout::FLAG_VALID;
        if desc.skip_prot_check {
            flags |= layout::FLAG_SKIP_PROT_CHECK;
        }
        // The fence ensures every field above is visible to hardware before
        // the valid bit that tells it the slot is ready.
        r.fence();
        r.write_u32(base + layout::F_FLAGS, flags);
        self.write_ptr = self.write_ptr.wrapping_add(1);
        // The register holds a free-running counter, not a slot index, so
        // `poll_retired`'s comparison against the read pointer never has to
        // worry about the capacity-modulo wraparound happening mid-compare.
        r.write_u32(layout::WRITE_PTR_OFFSET, self.write_ptr as u32);
        slot
    }

    /// Polls the hardware read pointer and returns every slot retired since
    /// the last call, in ring order.
    pub(crate) fn poll_retired(&mut self) -> Vec<(usize, Retired)> {
        let r = self.regs.as_ref();
        let read_ptr = r.read_u32(layout::READ_PTR_OFFSET) as usize;
        let mut out = Vec::new();
        while self.drained_ptr != read_ptr {
            let slot = self.drained_ptr % self.capacity;
            let base = layout::slot_offset(slot);
            let result = r.read_u32(base + layout::F_RESULT);
            let retired = if result == layout::RESULT_ERROR { Retired::Error } else { Retired::Ok };
            r.write_u32(base + layout::F_FLAGS, 0);
            out.push((slot, retired));
            self.drained_ptr = self.drained_ptr.wrapping_add(1);
        }
        out
    }

    /// Forces a slot back to the free state outside the normal retirement
    /// path. Used by `terminate` on a posted descriptor the caller no longer
    /// wants to wait for.
    pub(crate) fn force_clear(&self, slot: usize) {
        let base = layout::slot_offset(slot);
        self.regs.write_u32(base + layout::F_FLAGS, 0);
    }

    pub(crate) fn shutdown(&self) {
        self.regs.write_u32(layout::CTL_STATUS_OFFSET, layout::CTL_STOP);
    }
}
