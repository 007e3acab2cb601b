// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-task ordered pending-signal storage.

use crate::masks;
use std::collections::VecDeque;
use tracelimit::warn_ratelimited;
use ve_hal::mask::SigMask;

/// Payload carried alongside a pending signal. Mirrors the handful of
/// `siginfo_t` fields `setup_frame` actually needs to copy into the frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct SigInfo {
    pub code: i32,
    pub pid: i32,
    pub uid: u32,
    pub addr: u64,
    pub status: i32,
}

struct SigRecord {
    sig: u32,
    sync_exception: bool,
    info: SigInfo,
}

/// A dequeued signal and whether it arrived synchronously (from an
/// accelerator-core exception) rather than asynchronously.
pub struct Dequeued {
    pub sig: u32,
    pub info: SigInfo,
    pub sync_exception: bool,
}

/// Per-task ordered list of pending signal records, plus the aggregated
/// pending mask `dequeue`/`enqueue` keep in lockstep with it.
pub struct SigQueue {
    pending_mask: SigMask,
    records: VecDeque<SigRecord>,
    /// Resource limit on the number of queued records (`RLIMIT_SIGPENDING`).
    /// Standard signals always get a slot (see invariant 4); this only
    /// gates additional records once one is already queued.
    limit: usize,
}

impl SigQueue {
    pub fn new(limit: usize) -> Self {
        Self { pending_mask: SigMask::EMPTY, records: VecDeque::new(), limit }
    }

    pub fn pending_mask(&self) -> SigMask {
        self.pending_mask
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Queues `sig`. Non-real-time signals coalesce with an already-pending
    /// instance (a no-op: the bit is already set). If the queue is at its
    /// resource limit and `override_rlimit` is false, the record is dropped
    /// but the pending bit is still set, per invariant 4's documented
    /// exception.
    pub fn enqueue(&mut self, sig: u32, info: SigInfo, sync_exception: bool, override_rlimit: bool) {
        if !masks::is_realtime(sig) && self.pending_mask.test(sig) {
            return;
        }
        if !override_rlimit && self.records.len() >= self.limit {
            warn_ratelimited!(sig, limit = self.limit, "dropping signal record: pending limit reached");
            self.pending_mask.set(sig);
            return;
        }
        self.records.push_back(SigRecord { sig, sync_exception, info });
        self.pending_mask.set(sig);
    }

    /// Selects and removes the next deliverable signal, given the task's
    /// currently blocked mask. Returns `None` if nothing in `pending &
    /// !blocked` is set.
    pub fn dequeue(&mut self, blocked: SigMask) -> Option<Dequeued> {
        let effective = self.pending_mask.difference(&blocked);
        if effective.is_empty() {
            return None;
        }
        let synchronous = effective.intersection(&masks::synchronous_mask());
        let candidates = if !synchronous.is_empty() { synchronous } else { effective };
        let sig = candidates.lowest()?;

        let (info, sync_exception) = match self.records.iter().position(|r| r.sig == sig) {
            Some(pos) => {
                let record = self.records.remove(pos).expect("position just found");
                if !self.records.iter().any(|r| r.sig == sig) {
                    self.pending_mask.clear(sig);
                }
                (record.info, record.sync_exception)
            }
            None => {
                // Bit was set with no backing record: an earlier enqueue was
                // rate-limit dropped. Deliver it with empty siginfo and clear
                // the bit; there is nothing more to remove.
                self.pending_mask.clear(sig);
                (SigInfo::default(), false)
            }
        };
        Some(Dequeued { sig, info, sync_exception })
    }

    /// Removes every record of `sig` and clears its pending bit.
    pub fn remove(&mut self, sig: u32) {
        self.records.retain(|r| r.sig != sig);
        self.pending_mask.clear(sig);
    }

    /// Removes every record whose signal is in `set` and clears those bits.
    pub fn remove_set(&mut self, set: SigMask) {
        self.records.retain(|r| !set.test(r.sig));
        self.pending_mask = self.pending_mask.difference(&set);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> SigInfo {
        SigInfo::default()
    }

    #[test]
    fn standard_signal_coalesces() {
        let mut q = SigQueue::new(64);
        q.enqueue(10, info(), false, false);
        q.enqueue(10, info(), false, false);
        assert_eq!(q.len(), 1);
        assert!(q.pending_mask().test(10));
    }

    #[test]
    fn realtime_signal_does_not_coalesce() {
        let rt = libc::SIGRTMIN() as u32;
        let mut q = SigQueue::new(64);
        q.enqueue(rt, info(), false, false);
        q.enqueue(rt, info(), false, false);
        q.enqueue(rt, info(), false, false);
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn dequeue_prefers_synchronous_signal() {
        use nix::sys::signal::Signal::{SIGSEGV, SIGUSR1};
        let mut q = SigQueue::new(64);
        q.enqueue(SIGUSR1 as u32, info(), false, false);
        q.enqueue(SIGSEGV as u32, info(), true, false);
        let d = q.dequeue(SigMask::EMPTY).expect("a signal is pending");
        assert_eq!(d.sig, SIGSEGV as u32);
    }

    #[test]
    fn dequeue_skips_blocked_signals() {
        use nix::sys::signal::Signal::{SIGSEGV, SIGUSR1};
        let mut q = SigQueue::new(64);
        q.enqueue(SIGUSR1 as u32, info(), false, false);
        let blocked = SigMask::from_signals([SIGUSR1 as u32]);
        assert!(q.dequeue(blocked).is_none());
        q.enqueue(SIGSEGV as u32, info(), true, false);
        let d = q.dequeue(blocked).expect("SIGSEGV is not blocked");
        assert_eq!(d.sig, SIGSEGV as u32);
    }

    #[test]
    fn rlimit_drop_still_sets_pending_bit() {
        let mut q = SigQueue::new(0);
        let rt = libc::SIGRTMIN() as u32;
        q.enqueue(rt, info(), false, false);
        assert_eq!(q.len(), 0);
        assert!(q.pending_mask().test(rt));
    }
}
