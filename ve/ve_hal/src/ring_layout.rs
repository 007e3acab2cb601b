// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The byte-offset layout of the DMA descriptor ring's control registers and
//! descriptor table.
//!
//! This is shared between the real ring consumer (`dma_engine::ring`) and
//! the in-memory backend (`ve_hal_emulated`) so both interpret the same
//! bytes the same way, the same role the wire-format module for a simulated
//! device plays against its real driver elsewhere in this codebase.

use crate::AddrKind;

pub const CTL_STATUS_OFFSET: usize = 0x00;
pub const CTL_START: u32 = 1 << 0;
pub const CTL_STOP: u32 = 1 << 1;

pub const READ_PTR_OFFSET: usize = 0x04;
pub const WRITE_PTR_OFFSET: usize = 0x08;

pub const DESC_TABLE_OFFSET: usize = 0x1000;
pub const DESC_STRIDE: usize = 0x40;

pub const F_SRC_KIND: usize = 0x00;
pub const F_SRC_PID: usize = 0x04;
pub const F_SRC_ADDR: usize = 0x08;
pub const F_DST_KIND: usize = 0x10;
pub const F_DST_PID: usize = 0x14;
pub const F_DST_ADDR: usize = 0x18;
pub const F_LENGTH: usize = 0x20;
pub const F_FLAGS: usize = 0x28;
pub const F_RESULT: usize = 0x2C;

pub const FLAG_VALID: u32 = 1 << 0;
pub const FLAG_SKIP_PROT_CHECK: u32 = 1 << 1;

pub const RESULT_PENDING: u32 = 0;
pub const RESULT_OK: u32 = 1;
pub const RESULT_ERROR: u32 = 2;

pub fn slot_offset(slot: usize) -> usize {
    DESC_TABLE_OFFSET + slot * DESC_STRIDE
}

/// Which physical bus a resolved descriptor endpoint sits on. Narrower than
/// [`AddrKind`]: once an address has been translated to a physical one, the
/// hardware only needs to know which decode path to route it down, not
/// whether the caller originally named it virtually or physically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    Host,
    Accel,
    AccelReg,
}

impl Space {
    pub fn of(kind: AddrKind) -> Self {
        match kind {
            AddrKind::HostVirt | AddrKind::HostPhys => Space::Host,
            AddrKind::VaVirt | AddrKind::VaVirtNoProtCheck | AddrKind::VaPhys => Space::Accel,
            AddrKind::VaRegPhys => Space::AccelReg,
        }
    }

    pub fn tag(self) -> u32 {
        match self {
            Space::Host => 0,
            Space::Accel => 1,
            Space::AccelReg => 2,
        }
    }

    pub fn from_tag(tag: u32) -> Self {
        match tag {
            0 => Space::Host,
            2 => Space::AccelReg,
            _ => Space::Accel,
        }
    }
}
