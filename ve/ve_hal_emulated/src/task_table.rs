// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! An in-memory process/thread table a test can shape however a scenario
//! needs, instead of walking the real `/proc`.

use parking_lot::Mutex;
use std::collections::HashMap;
use ve_hal::{HostProcessState, TaskHandle, TaskTable};

#[derive(Default)]
pub struct EmulatedTaskTable {
    /// pid -> group leader pid.
    leaders: Mutex<HashMap<i32, i32>>,
    /// leader pid -> every thread in the group, leader included.
    groups: Mutex<HashMap<i32, Vec<i32>>>,
    /// pid -> host-side run state, defaulting to `Running` if unset.
    host_states: Mutex<HashMap<i32, HostProcessState>>,
}

impl EmulatedTaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a single-threaded process: `pid` is its own group leader.
    pub fn add_process(&self, pid: i32) {
        self.add_thread(pid, pid);
    }

    /// Registers `pid` as a thread in `leader`'s group (`leader == pid` for
    /// the group leader itself).
    pub fn add_thread(&self, pid: i32, leader: i32) {
        self.leaders.lock().insert(pid, leader);
        self.groups.lock().entry(leader).or_default().push(pid);
    }

    pub fn set_host_state(&self, pid: i32, state: HostProcessState) {
        self.host_states.lock().insert(pid, state);
    }
}

impl TaskTable for EmulatedTaskTable {
    fn find_task(&self, pid: i32) -> Option<TaskHandle> {
        self.leaders.lock().contains_key(&pid).then_some(TaskHandle(pid))
    }

    fn task_group_leader(&self, task: TaskHandle) -> TaskHandle {
        let leader = self.leaders.lock().get(&task.pid()).copied().unwrap_or(task.pid());
        TaskHandle(leader)
    }

    fn iterate_thread_group(&self, leader: TaskHandle) -> Vec<TaskHandle> {
        self.groups
            .lock()
            .get(&leader.pid())
            .map(|members| members.iter().map(|&pid| TaskHandle(pid)).collect())
            .unwrap_or_default()
    }

    fn host_state(&self, task: TaskHandle) -> HostProcessState {
        self.host_states
            .lock()
            .get(&task.pid())
            .copied()
            .unwrap_or(HostProcessState::Running)
    }
}
