// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Records kill requests instead of sending real signals, so a test can
//! assert the host was asked to terminate the right pid with the right
//! signal.

use parking_lot::Mutex;
use ve_hal::HostNotify;

#[derive(Default)]
pub struct EmulatedHostNotify {
    killed: Mutex<Vec<(i32, u32)>>,
}

impl EmulatedHostNotify {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn killed(&self) -> Vec<(i32, u32)> {
        self.killed.lock().clone()
    }
}

impl HostNotify for EmulatedHostNotify {
    fn kill(&self, pid: i32, sig: u32) {
        self.killed.lock().push((pid, sig));
    }
}
