// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The caller-facing handle to a submitted request and the bookkeeping the
//! engine keeps for it.
//!
//! A [`ReqList`] is a thin handle: `Arc<Engine>` plus an integer key. The
//! actual per-entry state (which descriptor slot it occupies, whether it has
//! completed) lives in the engine's own slabs, protected by the engine's one
//! mutex. This avoids a `ReqEntry -> ReqList -> ReqEntry` reference cycle: the
//! engine's descriptor slots and wait queue hold slab keys, never strong
//! references back into a `ReqList`.

use crate::engine::Engine;
use crate::DmaError;
use std::sync::Arc;
use std::time::Duration;
use ve_hal::ring_layout::Space;

/// Slab key for one split-off hardware transfer inside the engine's entry
/// table.
pub(crate) type EntryKey = usize;

/// Slab key for the group of entries that make up one submitted [`Request`].
pub(crate) type ReqListKey = usize;

/// Lifecycle state of a single hardware descriptor's worth of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReqEntryStatus {
    /// Waiting in the engine's wait queue for a free descriptor slot.
    Queued,
    /// Written into a descriptor slot, not yet retired by hardware.
    Posted,
    /// Hardware retired the descriptor successfully.
    Completed,
    /// Hardware retired the descriptor with an error.
    Failed,
    /// Removed from the ring or wait queue by `terminate` before completion.
    Canceled,
}

impl ReqEntryStatus {
    pub(crate) fn is_terminal(self) -> bool {
        !matches!(self, ReqEntryStatus::Queued | ReqEntryStatus::Posted)
    }
}

/// The combined status of every entry in a [`ReqList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateStatus {
    /// At least one entry is still queued or posted.
    NotFinished,
    /// Every entry completed successfully.
    Ok,
    /// At least one entry failed and none were canceled.
    Error,
    /// At least one entry was canceled.
    Canceled,
}

pub(crate) struct ReqEntryRecord {
    pub src_space: Space,
    pub src_pid: i32,
    pub src_phys: u64,
    pub dst_space: Space,
    pub dst_pid: i32,
    pub dst_phys: u64,
    pub length: u64,
    pub skip_prot_check: bool,
    pub status: ReqEntryStatus,
    pub reqlist: ReqListKey,
}

pub(crate) struct ReqListRecord {
    pub entries: Vec<EntryKey>,
    /// Kept behind its own `Arc` (rather than embedded directly) so a waiter
    /// can clone it out and call `wait`/`wait_for` while still holding the
    /// engine's single `MutexGuard` over the slab this record lives in.
    pub cond: Arc<parking_lot::Condvar>,
    /// Entries not yet freed by a `terminate`/drop pass. Used so
    /// `Engine::free_reqlist` only runs once.
    pub freed: bool,
}

impl ReqListRecord {
    pub(crate) fn aggregate(&self, entries: &slab::Slab<ReqEntryRecord>) -> AggregateStatus {
        let mut any_error = false;
        let mut any_canceled = false;
        for &key in &self.entries {
            match entries[key].status {
                ReqEntryStatus::Queued | ReqEntryStatus::Posted => return AggregateStatus::NotFinished,
                ReqEntryStatus::Failed => any_error = true,
                ReqEntryStatus::Canceled => any_canceled = true,
                ReqEntryStatus::Completed => {}
            }
        }
        if any_canceled {
            AggregateStatus::Canceled
        } else if any_error {
            AggregateStatus::Error
        } else {
            AggregateStatus::Ok
        }
    }
}

/// A caller's handle to a submitted request.
///
/// Exclusively owned by the caller (not `Clone`): the engine keeps only weak,
/// index-based references to the entries this list owns, so there is no
/// ambiguity about who frees the underlying slab rows.
pub struct ReqList {
    pub(crate) engine: Arc<Engine>,
    pub(crate) key: ReqListKey,
}

impl ReqList {
    /// Non-blocking status check.
    pub fn test(&self) -> AggregateStatus {
        self.engine.reqlist_status(self.key)
    }

    /// Blocks until every entry reaches a terminal state.
    pub fn wait(&self) -> AggregateStatus {
        self.engine.wait_reqlist(self.key, None).expect("wait without deadline cannot time out")
    }

    /// Blocks until every entry reaches a terminal state or `timeout`
    /// elapses, whichever comes first.
    pub fn timed_wait(&self, timeout: Duration) -> Result<AggregateStatus, DmaError> {
        self.engine.wait_reqlist(self.key, Some(timeout))
    }

    /// Cancels every entry that has not yet completed. Entries already
    /// posted to hardware are marked canceled once the ring confirms they
    /// are no longer in flight; queued entries are removed immediately.
    pub fn terminate(&self) {
        self.engine.terminate_reqlist(self.key);
    }
}

impl Drop for ReqList {
    fn drop(&mut self) {
        self.engine.free_reqlist(self.key);
    }
}
