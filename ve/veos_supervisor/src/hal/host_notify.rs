// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Delivers the host-visible kill directly: the host pseudo process backing
//! a task is just an ordinary process on this machine, signaled with
//! `kill(2)`.

#![expect(unsafe_code)]

use ve_hal::HostNotify;

pub struct KillHostNotify;

impl HostNotify for KillHostNotify {
    fn kill(&self, pid: i32, sig: u32) {
        // SAFETY: `kill` has no preconditions beyond a valid signal number;
        // a nonexistent pid is reported back as ESRCH, not undefined
        // behavior.
        let rc = unsafe { libc::kill(pid, sig as i32) };
        if rc != 0 {
            tracing::warn!(pid, sig, error = %std::io::Error::last_os_error(), "kill failed");
        }
    }
}
