// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Group-wide signal actions.
//!
//! The original implementation walks the thread group under
//! `global_task_list_lock -> sighand_lock -> task_lock` for every group
//! action. This keeps that order, collapsed to one registry-level lock
//! (`TaskRegistry`'s internal `RwLock`) followed by each task's own lock,
//! since nothing here models a `sighand_struct` shared independently of a
//! task's signal state.

use crate::masks;
use crate::task::{OngoingAction, RunState, Task, TaskRegistry};
use tracing::debug;
use ve_hal::{CoreControl, HostProcessState, TaskHandle, TaskTable};

/// A signal-driven action that applies to every task sharing a group
/// leader, not just the one that received the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupAction {
    Continue,
    Stop,
    /// Stop only the members whose host-side pseudo process the host
    /// already observes stopped; used when a stop races a host-side ptrace
    /// stop rather than unconditionally re-stopping everything.
    StopIfHostStopped,
    /// Drop every other thread in the group in preparation for a core dump
    /// or `exit_group`, without running full signal delivery on them.
    CleanThread,
}

/// Applies [`GroupAction`]s across a thread group and masks individual
/// signals on a single task.
pub struct GroupCoordinator<'a> {
    registry: &'a TaskRegistry,
    task_table: &'a dyn TaskTable,
}

impl<'a> GroupCoordinator<'a> {
    pub fn new(registry: &'a TaskRegistry, task_table: &'a dyn TaskTable) -> Self {
        Self { registry, task_table }
    }

    fn group_members(&self, leader: TaskHandle) -> Vec<std::sync::Arc<Task>> {
        self.task_table
            .iterate_thread_group(leader)
            .into_iter()
            .filter_map(|handle| self.registry.get(handle.pid()))
            .collect()
    }

    /// `SIGCONT`'s default action: wake every stopped member and discard
    /// any pending stop signal, regardless of installed handler.
    pub fn continue_group(&self, leader: TaskHandle) {
        self.apply(leader, GroupAction::Continue, None);
    }

    pub fn stop(&self, leader: TaskHandle, core: &dyn CoreControl) {
        self.apply(leader, GroupAction::Stop, Some(core));
    }

    pub fn stop_if_host_stopped(&self, leader: TaskHandle, core: &dyn CoreControl) {
        self.apply(leader, GroupAction::StopIfHostStopped, Some(core));
    }

    pub fn clean_thread(&self, leader: TaskHandle, core: &dyn CoreControl) {
        self.apply(leader, GroupAction::CleanThread, Some(core));
    }

    fn apply(&self, leader: TaskHandle, action: GroupAction, core: Option<&dyn CoreControl>) {
        for member in self.group_members(leader) {
            match action {
                GroupAction::Continue => {
                    let mut state = member.state();
                    state.queue.remove_set(masks::stopping_mask());
                    if state.run_state != RunState::Running {
                        state.run_state = RunState::Running;
                    }
                }
                GroupAction::Stop => {
                    let mut state = member.state();
                    state.queue.remove_set(masks::stopping_mask());
                    state.run_state = RunState::Stop;
                    if let Some(core) = core {
                        core.halt(member.handle());
                    }
                }
                GroupAction::StopIfHostStopped => {
                    let host_stopped = self.task_table.host_state(member.handle()) == HostProcessState::Stopped;
                    if !host_stopped {
                        continue;
                    }
                    let mut state = member.state();
                    state.run_state = RunState::Stop;
                    if let Some(core) = core {
                        core.halt(member.handle());
                    }
                }
                GroupAction::CleanThread => {
                    let mut state = member.state();
                    state.ongoing_action = OngoingAction::GroupExit;
                    state.run_state = RunState::Stop;
                    if let Some(core) = core {
                        core.halt(member.handle());
                    }
                }
            }
        }
        debug!(pid = leader.pid(), ?action, "applied group action");
    }

    /// Blocks or unblocks `sig` on a single task. Deliberately scoped to one
    /// task rather than the whole group: a task's blocked mask is per-thread
    /// state (`sigprocmask` is a thread property), not shared across a
    /// thread group the way pending signals and handlers are.
    pub fn mask_signal(&self, task: &Task, sig: u32, block: bool) {
        let mut state = task.state();
        if block {
            state.blocked.set(sig);
        } else {
            state.blocked.clear(sig);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ve_hal_emulated::{EmulatedCoreControl, EmulatedTaskTable};

    #[test]
    fn stop_halts_every_member_of_the_group() {
        let registry = TaskRegistry::new();
        let task_table = EmulatedTaskTable::new();
        let core = EmulatedCoreControl::new();

        task_table.add_thread(10, 10);
        task_table.add_thread(11, 10);
        let leader = registry.register(10, TaskHandle(10), 16);
        let other = registry.register(11, TaskHandle(10), 16);
        core.set_current(10);
        core.set_current(11);

        let group = GroupCoordinator::new(&registry, &task_table);
        group.stop(TaskHandle(10), &core);

        assert_eq!(leader.state().run_state, RunState::Stop);
        assert_eq!(other.state().run_state, RunState::Stop);
        assert!(core.was_halted(10));
        assert!(core.was_halted(11));
    }

    #[test]
    fn continue_group_wakes_members_and_drops_stop_signals() {
        let registry = TaskRegistry::new();
        let task_table = EmulatedTaskTable::new();
        task_table.add_process(20);
        let task = registry.register(20, TaskHandle(20), 16);

        {
            let mut state = task.state();
            state.run_state = RunState::Stop;
            state.queue.enqueue(nix::sys::signal::Signal::SIGSTOP as u32, crate::queue::SigInfo::default(), false, false);
        }

        let group = GroupCoordinator::new(&registry, &task_table);
        group.continue_group(TaskHandle(20));

        let state = task.state();
        assert_eq!(state.run_state, RunState::Running);
        assert!(!state.queue.pending_mask().test(nix::sys::signal::Signal::SIGSTOP as u32));
    }

    #[test]
    fn mask_signal_only_affects_the_task_it_is_called_on() {
        let registry = TaskRegistry::new();
        let task_table = EmulatedTaskTable::new();
        task_table.add_thread(30, 30);
        task_table.add_thread(31, 30);
        let a = registry.register(30, TaskHandle(30), 16);
        let b = registry.register(31, TaskHandle(30), 16);

        let group = GroupCoordinator::new(&registry, &task_table);
        group.mask_signal(&a, 10, true);

        assert!(a.state().blocked.test(10));
        assert!(!b.state().blocked.test(10));
    }
}
