// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! An in-memory register file that actually moves bytes: a background
//! thread watches for the descriptor "valid" bit the same way real hardware
//! would, and on seeing one set, copies the descriptor's `length` bytes from
//! its source address to its destination address and retires the slot.
//!
//! Source and destination addresses are whatever raw pointer values the
//! caller's `Request` carried (tests run in a single process address space,
//! so there is no real physical/virtual distinction to model), which is why
//! this module needs `unsafe` to perform the copy.

#![expect(unsafe_code)]

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use ve_hal::ring_layout as layout;
use ve_hal::RegisterIo;

struct Inner {
    bytes: Mutex<Vec<u8>>,
    /// When set, the next descriptor the worker retires is forced to report
    /// a hardware error instead of performing the copy. Cleared after use.
    inject_next_error: AtomicBool,
    should_stop: AtomicBool,
    /// When set, the worker does not retire any descriptors. Lets a test
    /// observe a request while it is still queued or posted, deterministically.
    paused: AtomicBool,
}

impl Inner {
    fn read_u32(&self, offset: usize) -> u32 {
        let bytes = self.bytes.lock();
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn write_u32(&self, offset: usize, value: u32) {
        let mut bytes = self.bytes.lock();
        bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn read_u64(&self, offset: usize) -> u64 {
        let bytes = self.bytes.lock();
        u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap())
    }

    fn write_u64(&self, offset: usize, value: u64) {
        let mut bytes = self.bytes.lock();
        bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }
}

/// An in-memory stand-in for the descriptor ring's mapped register window.
pub struct EmulatedRegisterIo {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EmulatedRegisterIo {
    /// `capacity` must match the number of descriptor slots the consuming
    /// `HwDescRing` was opened with.
    pub fn new(capacity: usize) -> Arc<Self> {
        let size = layout::slot_offset(capacity);
        let inner = Arc::new(Inner {
            bytes: Mutex::new(vec![0u8; size]),
            inject_next_error: AtomicBool::new(false),
            should_stop: AtomicBool::new(false),
            paused: AtomicBool::new(false),
        });

        let worker_inner = inner.clone();
        let worker = std::thread::Builder::new()
            .name("emulated-dma-hardware".into())
            .spawn(move || Self::hardware_loop(worker_inner, capacity))
            .expect("failed to spawn emulated DMA hardware thread");

        Arc::new(Self {
            inner,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Forces the next descriptor the emulated hardware retires to report a
    /// transfer error instead of performing the copy.
    pub fn inject_next_error(&self) {
        self.inner.inject_next_error.store(true, Ordering::Release);
    }

    /// Stops the emulated hardware from retiring any further descriptors
    /// until [`Self::resume`] is called. Descriptors already posted stay
    /// posted; useful for deterministically observing in-flight state.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::Release);
    }

    fn hardware_loop(inner: Arc<Inner>, capacity: usize) {
        let mut write_ptr_seen = 0u32;
        while !inner.should_stop.load(Ordering::Acquire) {
            if inner.paused.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_micros(100));
                continue;
            }
            let current_write_ptr = inner.read_u32(layout::WRITE_PTR_OFFSET);
            while write_ptr_seen != current_write_ptr {
                let slot = (write_ptr_seen as usize) % capacity;
                let base = layout::slot_offset(slot);
                let flags = inner.read_u32(base + layout::F_FLAGS);
                if flags & layout::FLAG_VALID != 0 {
                    let src = inner.read_u64(base + layout::F_SRC_ADDR);
                    let dst = inner.read_u64(base + layout::F_DST_ADDR);
                    let length = inner.read_u64(base + layout::F_LENGTH) as usize;

                    let result = if inner.inject_next_error.swap(false, Ordering::AcqRel) {
                        layout::RESULT_ERROR
                    } else {
                        // SAFETY: in this in-process emulation `src`/`dst`
                        // are real pointers the test handed to `Request`,
                        // valid for `length` bytes and non-overlapping (the
                        // splitter never builds a descriptor that copies a
                        // buffer onto itself).
                        unsafe {
                            std::ptr::copy_nonoverlapping(src as *const u8, dst as *mut u8, length);
                        }
                        layout::RESULT_OK
                    };
                    inner.write_u32(base + layout::F_RESULT, result);
                    inner.write_u32(base + layout::F_FLAGS, 0);
                }
                write_ptr_seen = write_ptr_seen.wrapping_add(1);
                inner.write_u32(layout::READ_PTR_OFFSET, write_ptr_seen);
            }
            std::thread::sleep(Duration::from_micros(100));
        }
    }
}

impl RegisterIo for EmulatedRegisterIo {
    fn read_u32(&self, offset: usize) -> u32 {
        self.inner.read_u32(offset)
    }

    fn write_u32(&self, offset: usize, value: u32) {
        self.inner.write_u32(offset, value)
    }

    fn read_u64(&self, offset: usize) -> u64 {
        self.inner.read_u64(offset)
    }

    fn write_u64(&self, offset: usize, value: u64) {
        self.inner.write_u64(offset, value)
    }

    fn fence(&self) {
        // A single global mutex already serializes every access; there is
        // no weaker memory order for this emulation to model.
    }
}

impl Drop for EmulatedRegisterIo {
    fn drop(&mut self) {
        self.inner.should_stop.store(true, Ordering::Release);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}
