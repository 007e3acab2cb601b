// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! An in-memory [`Translate`] backend. Tests run in a single process address
//! space with no real page tables, so every virtual address is its own
//! physical address (the "physical" address a descriptor ends up carrying is
//! just the real pointer value the test handed in) unless a test has
//! explicitly registered a fault or a read-only mapping for it.

use parking_lot::Mutex;
use std::collections::HashMap;
use ve_hal::{HalError, Translate, Translation};

/// Default page size used for the identity mapping. Large enough that a
/// realistic test transfer never crosses it by accident.
const DEFAULT_PAGE_SIZE: u64 = 1 << 20;

#[derive(Debug, Clone, Copy)]
enum Override {
    Fault,
    ReadOnly,
}

/// Identity-mapping [`Translate`] implementation with per-address overrides
/// a test can install to exercise fault and read-only paths.
#[derive(Default)]
pub struct EmulatedTranslate {
    overrides: Mutex<HashMap<(i32, u64), Override>>,
}

impl EmulatedTranslate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `translate` fail for this exact `(pid, addr)` pair.
    pub fn inject_fault(&self, pid: i32, addr: u64) {
        self.overrides.lock().insert((pid, addr), Override::Fault);
    }

    /// Makes `translate` report this `(pid, addr)` pair as read-only.
    pub fn mark_read_only(&self, pid: i32, addr: u64) {
        self.overrides.lock().insert((pid, addr), Override::ReadOnly);
    }
}

impl Translate for EmulatedTranslate {
    fn translate(&self, pid: i32, virt_addr: u64, want_write: bool) -> Result<Translation, HalError> {
        match self.overrides.lock().get(&(pid, virt_addr)) {
            Some(Override::Fault) => Err(HalError::Translation {
                addr: virt_addr,
                pid,
                want_write,
            }),
            Some(Override::ReadOnly) => Ok(Translation {
                phys_addr: virt_addr,
                page_size: DEFAULT_PAGE_SIZE,
                writable: false,
            }),
            None => Ok(Translation {
                phys_addr: virt_addr,
                page_size: DEFAULT_PAGE_SIZE,
                writable: true,
            }),
        }
    }
}
