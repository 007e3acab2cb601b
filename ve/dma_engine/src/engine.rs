// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The engine: owns the descriptor ring, the wait queue of requests that
//! could not get a free slot, and a background thread that drains retired
//! descriptors and wakes the callers waiting on them.

use crate::reqlist::{AggregateStatus, EntryKey, ReqEntryRecord, ReqEntryStatus, ReqList, ReqListKey, ReqListRecord};
use crate::ring::{Descriptor, HwDescRing, Retired};
use crate::{splitter, DmaError, Request};
use parking_lot::{Condvar, Mutex};
use slab::Slab;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info_span, warn};
use ve_hal::{RegisterIo, Translate};

struct State {
    ring: HwDescRing,
    slots: Vec<Option<EntryKey>>,
    wait_queue: VecDeque<EntryKey>,
    entries: Slab<ReqEntryRecord>,
    reqlists: Slab<ReqListRecord>,
    used_count: usize,
}

impl State {
    /// Posts as many queued entries as there are free slots, oldest first.
    fn drain_wait_queue(&mut self) {
        while self.used_count < self.ring.capacity() {
            let Some(key) = self.wait_queue.pop_front() else {
                break;
            };
            let entry = &self.entries[key];
            let desc = Descriptor {
                src_space: entry.src_space,
                src_pid: entry.src_pid,
                src_phys: entry.src_phys,
                dst_space: entry.dst_space,
                dst_pid: entry.dst_pid,
                dst_phys: entry.dst_phys,
                length: entry.length,
                skip_prot_check: entry.skip_prot_check,
            };
            let slot = self.ring.post(&desc);
            self.slots[slot] = Some(key);
            self.entries[key].status = ReqEntryStatus::Posted;
            self.used_count += 1;
        }
    }
}

/// The DMA engine manager.
///
/// One `Engine` owns one hardware descriptor ring. Submissions are split by
/// [`splitter::plan`] into ring-sized pieces, posted immediately if a slot is
/// free, or queued (FIFO) until the interrupt helper thread frees one.
pub struct Engine {
    state: Mutex<State>,
    translate: Arc<dyn Translate>,
    should_stop: AtomicBool,
    helper: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Opens the engine against a mapped register window and starts its
    /// interrupt helper thread. `num_desc` is the ring's descriptor count.
    pub fn open(regs: Arc<dyn RegisterIo>, translate: Arc<dyn Translate>, num_desc: usize) -> Arc<Self> {
        let ring = HwDescRing::new(regs, num_desc);
        let state = State {
            slots: vec![None; ring.capacity()],
            wait_queue: VecDeque::new(),
            entries: Slab::new(),
            reqlists: Slab::new(),
            used_count: 0,
            ring,
        };
        let engine = Arc::new(Self {
            state: Mutex::new(state),
            translate,
            should_stop: AtomicBool::new(false),
            helper: Mutex::new(None),
        });

        let worker_engine = engine.clone();
        let handle = std::thread::Builder::new()
            .name("dma-interrupt-helper".into())
            .spawn(move || worker_engine.interrupt_helper_loop())
            .expect("failed to spawn DMA interrupt helper thread");
        *engine.helper.lock() = Some(handle);
        engine
    }

    /// Splits `req` and submits every piece, posting to free slots
    /// immediately and queueing the rest.
    pub fn submit(self: &Arc<Self>, req: Request) -> Result<ReqList, DmaError> {
        req.validate()?;
        if self.should_stop.load(Ordering::Acquire) {
            return Err(DmaError::ShuttingDown);
        }
        let pieces = splitter::plan(&req, self.translate.as_ref())?;

        let mut state = self.state.lock();
        let reqlist_key = state.reqlists.insert(ReqListRecord {
            entries: Vec::with_capacity(pieces.len()),
            cond: Arc::new(Condvar::new()),
            freed: false,
        });
        for piece in &pieces {
            let entry_key = state.entries.insert(ReqEntryRecord {
                src_space: piece.src_space,
                src_pid: piece.src_pid,
                src_phys: piece.src_phys,
                dst_space: piece.dst_space,
                dst_pid: piece.dst_pid,
                dst_phys: piece.dst_phys,
                length: piece.length,
                skip_prot_check: piece.skip_prot_check,
                status: ReqEntryStatus::Queued,
                reqlist: reqlist_key,
            });
            state.reqlists[reqlist_key].entries.push(entry_key);
            if state.used_count < state.ring.capacity() {
                let slot = state.ring.post(piece);
                state.slots[slot] = Some(entry_key);
                state.entries[entry_key].status = ReqEntryStatus::Posted;
                state.used_count += 1;
            } else {
                state.wait_queue.push_back(entry_key);
            }
        }
        drop(state);

        Ok(ReqList {
            engine: self.clone(),
            key: reqlist_key,
        })
    }

    pub(crate) fn reqlist_status(&self, key: ReqListKey) -> AggregateStatus {
        let state = self.state.lock();
        state.reqlists[key].aggregate(&state.entries)
    }

    pub(crate) fn wait_reqlist(&self, key: ReqListKey, timeout: Option<Duration>) -> Result<AggregateStatus, DmaError> {
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut state = self.state.lock();
        loop {
            let status = state.reqlists[key].aggregate(&state.entries);
            if status != AggregateStatus::NotFinished {
                return Ok(status);
            }
            // Cloning the `Arc<Condvar>` out of the slab row lets `wait`
            // borrow it independently of the `MutexGuard` it also needs.
            let cond = state.reqlists[key].cond.clone();
            match deadline {
                None => {
                    cond.wait(&mut state);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(DmaError::TimedOut);
                    }
                    let result = cond.wait_for(&mut state, deadline - now);
                    if result.timed_out() {
                        let status = state.reqlists[key].aggregate(&state.entries);
                        if status != AggregateStatus::NotFinished {
                            return Ok(status);
                        }
                        return Err(DmaError::TimedOut);
                    }
                }
            }
        }
    }

    pub(crate) fn terminate_reqlist(&self, key: ReqListKey) {
        let mut state = self.state.lock();
        let entry_keys = state.reqlists[key].entries.clone();
        for entry_key in entry_keys {
            let status = state.entries[entry_key].status;
            match status {
                ReqEntryStatus::Queued => {
                    state.wait_queue.retain(|&k| k != entry_key);
                    state.entries[entry_key].status = ReqEntryStatus::Canceled;
                }
                ReqEntryStatus::Posted => {
                    if let Some(slot) = state.slots.iter().position(|s| *s == Some(entry_key)) {
                        state.ring.force_clear(slot);
                        state.slots[slot] = None;
                        state.used_count -= 1;
                    }
                    state.entries[entry_key].status = ReqEntryStatus::Canceled;
                }
                ReqEntryStatus::Completed | ReqEntryStatus::Failed | ReqEntryStatus::Canceled => {}
            }
        }
        state.drain_wait_queue();
        state.reqlists[key].cond.notify_all();
    }

    pub(crate) fn free_reqlist(&self, key: ReqListKey) {
        let mut state = self.state.lock();
        if state.reqlists[key].freed {
            return;
        }
        let status = state.reqlists[key].aggregate(&state.entries);
        if status == AggregateStatus::NotFinished {
            drop(state);
            self.terminate_reqlist(key);
            state = self.state.lock();
        }
        let entry_keys = state.reqlists[key].entries.clone();
        for entry_key in entry_keys {
            state.entries.remove(entry_key);
        }
        state.reqlists[key].freed = true;
        state.reqlists.remove(key);
    }

    /// Cancels every in-flight request and stops the interrupt helper
    /// thread. Safe to call from `Drop`; idempotent.
    pub fn terminate_all(&self) {
        self.should_stop.store(true, Ordering::Release);
        let mut state = self.state.lock();
        for (_, record) in state.reqlists.iter_mut() {
            record.cond.notify_all();
        }
        for entry in state.entries.iter_mut() {
            if !entry.1.status.is_terminal() {
                entry.1.status = ReqEntryStatus::Canceled;
            }
        }
        state.wait_queue.clear();
        for slot in state.slots.iter_mut() {
            *slot = None;
        }
        state.used_count = 0;
        state.ring.shutdown();
    }

    fn interrupt_helper_loop(self: Arc<Self>) {
        let _span = info_span!("dma_interrupt_helper").entered();
        while !self.should_stop.load(Ordering::Acquire) {
            let mut state = self.state.lock();
            let retired = state.ring.poll_retired();
            for (slot, outcome) in retired {
                let Some(entry_key) = state.slots[slot].take() else {
                    warn!(slot, "retired descriptor had no owning entry");
                    continue;
                };
                state.used_count -= 1;
                let reqlist_key = state.entries[entry_key].reqlist;
                state.entries[entry_key].status = match outcome {
                    Retired::Ok => ReqEntryStatus::Completed,
                    Retired::Error => ReqEntryStatus::Failed,
                };
                debug!(slot, entry_key, ?outcome, "descriptor retired");
                if state.reqlists.contains(reqlist_key) {
                    state.reqlists[reqlist_key].cond.notify_all();
                }
            }
            state.drain_wait_queue();
            drop(state);
            std::thread::sleep(Duration::from_micros(200));
        }
    }

    pub(crate) fn translate(&self) -> &dyn Translate {
        self.translate.as_ref()
    }

    /// Number of hardware descriptor slots the ring was opened with.
    pub fn capacity(&self) -> usize {
        self.state.lock().ring.capacity()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.terminate_all();
        if let Some(handle) = self.helper.lock().take() {
            let _ = handle.join();
        }
    }
}
