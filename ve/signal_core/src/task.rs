// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-task signal state and the process-wide registry that owns it.
//!
//! The source keeps this in a statically initialized global task list
//! (`ve_init_task.tasks`) guarded by a reader/writer lock. Per the Design
//! Notes, that becomes an explicit service here: [`TaskRegistry`] is
//! constructed on startup and torn down on shutdown, never statically
//! initialized.

use crate::action::SigAction;
use crate::queue::SigQueue;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use ve_hal::mask::MAX_SIGNAL;
use ve_hal::{TaskHandle, TaskRegisters};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Stop,
    /// Continue arrived mid-exception; the task must finish handling the
    /// exception before it can actually resume.
    Wait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OngoingAction {
    None,
    CoreDump,
    GroupExit,
}

/// What `restore_context` should do about the syscall the task was in when
/// the signal interrupted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallOutcome {
    None,
    Restart,
    NoRestart,
}

pub const SS_DISABLE: i32 = 1 << 1;

#[derive(Debug, Clone, Copy, Default)]
pub struct AltStack {
    pub sp: u64,
    pub size: u64,
    pub flags: i32,
}

impl AltStack {
    pub fn is_disabled(&self) -> bool {
        self.flags & SS_DISABLE != 0 || self.size == 0
    }
}

pub struct TaskSignalState {
    pub queue: SigQueue,
    pub blocked: ve_hal::mask::SigMask,
    pub saved_mask: ve_hal::mask::SigMask,
    pub saved_mask_valid: bool,
    handlers: Vec<SigAction>,
    pub alt_stack: AltStack,
    pub on_alt_stack: bool,
    pub ongoing_action: OngoingAction,
    /// Signal number that put `ongoing_action` into `CoreDump`, read back by
    /// the dump worker once it has quiesced the thread group.
    pub coredump_signal: u32,
    pub group_leader: TaskHandle,
    pub run_state: RunState,
    /// Registers snapshotted the last time this task's core was halted.
    pub snapshot: Option<TaskRegisters>,
    pub lshm_scratch: [u8; crate::frame::LSHM_SZ],
    pub last_syscall: SyscallOutcome,
}

impl TaskSignalState {
    fn new(group_leader: TaskHandle, pending_limit: usize) -> Self {
        Self {
            queue: SigQueue::new(pending_limit),
            blocked: ve_hal::mask::SigMask::EMPTY,
            saved_mask: ve_hal::mask::SigMask::EMPTY,
            saved_mask_valid: false,
            handlers: vec![SigAction::default(); MAX_SIGNAL as usize],
            alt_stack: AltStack::default(),
            on_alt_stack: false,
            ongoing_action: OngoingAction::None,
            coredump_signal: 0,
            group_leader,
            run_state: RunState::Running,
            snapshot: None,
            lshm_scratch: [0u8; crate::frame::LSHM_SZ],
            last_syscall: SyscallOutcome::None,
        }
    }

    pub fn handler(&self, sig: u32) -> SigAction {
        self.handlers[(sig - 1) as usize]
    }

    pub fn set_handler(&mut self, sig: u32, action: SigAction) {
        self.handlers[(sig - 1) as usize] = action;
    }

    pub fn sigpending(&self) -> bool {
        !self.queue.pending_mask().difference(&self.blocked).is_empty()
    }
}

/// A single accelerator process's task, identified by pid, with its thread
/// group leader and signal state.
pub struct Task {
    pub pid: i32,
    state: Mutex<TaskSignalState>,
}

impl Task {
    pub fn handle(&self) -> TaskHandle {
        TaskHandle(self.pid)
    }

    pub fn state(&self) -> parking_lot::MutexGuard<'_, TaskSignalState> {
        self.state.lock()
    }
}

/// Owns every live task's signal state behind one reader/writer lock,
/// taken before any individual task's own lock (`global_task_list_lock ->
/// ... -> task_lock`).
#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<i32, Arc<Task>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, pid: i32, group_leader: TaskHandle, pending_limit: usize) -> Arc<Task> {
        let task = Arc::new(Task { pid, state: Mutex::new(TaskSignalState::new(group_leader, pending_limit)) });
        self.tasks.write().insert(pid, task.clone());
        task
    }

    pub fn get(&self, pid: i32) -> Option<Arc<Task>> {
        self.tasks.read().get(&pid).cloned()
    }

    /// Snapshot of every currently registered pid, for callers that need to
    /// iterate the table without holding its lock across each task's own.
    pub fn pids(&self) -> Vec<i32> {
        self.tasks.read().keys().copied().collect()
    }

    pub fn remove(&self, pid: i32) {
        self.tasks.write().remove(&pid);
    }

    /// Tears down every registered task. Called on supervisor shutdown so no
    /// task state outlives the process that owns it.
    pub fn shutdown(&self) {
        self.tasks.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_get_and_remove_round_trip() {
        let registry = TaskRegistry::new();
        let task = registry.register(7, TaskHandle(7), 64);
        assert_eq!(task.pid, 7);
        assert!(registry.get(7).is_some());
        assert_eq!(registry.pids(), vec![7]);

        registry.remove(7);
        assert!(registry.get(7).is_none());
        assert!(registry.pids().is_empty());
    }

    #[test]
    fn shutdown_clears_every_task() {
        let registry = TaskRegistry::new();
        registry.register(1, TaskHandle(1), 16);
        registry.register(2, TaskHandle(2), 16);
        assert_eq!(registry.pids().len(), 2);

        registry.shutdown();
        assert!(registry.pids().is_empty());
    }

    #[test]
    fn sigpending_ignores_blocked_signals() {
        let registry = TaskRegistry::new();
        let task = registry.register(1, TaskHandle(1), 16);

        {
            let mut state = task.state();
            state.queue.enqueue(10, crate::queue::SigInfo::default(), false, false);
            state.blocked.set(10);
        }
        assert!(!task.state().sigpending(), "a blocked signal is not reported as deliverable");

        task.state().blocked.clear(10);
        assert!(task.state().sigpending());
    }

    #[test]
    fn alt_stack_disabled_by_flag_or_zero_size() {
        let mut stack = AltStack { sp: 0x1000, size: 4096, flags: 0 };
        assert!(!stack.is_disabled());
        stack.flags = SS_DISABLE;
        assert!(stack.is_disabled());
        stack.flags = 0;
        stack.size = 0;
        assert!(stack.is_disabled());
    }
}
