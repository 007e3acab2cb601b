// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Reads the host-side pseudo process/thread table straight out of `/proc`:
//! `/proc/<pid>/status`'s `Tgid:` line gives the thread group leader, and its
//! `State:` line's leading character gives the coarse run state.

use std::fs;
use std::path::PathBuf;
use ve_hal::{HostProcessState, TaskHandle, TaskTable};

pub struct ProcTaskTable {
    proc_root: PathBuf,
}

impl ProcTaskTable {
    pub fn new() -> Self {
        Self { proc_root: PathBuf::from("/proc") }
    }

    #[cfg(test)]
    fn with_root(proc_root: PathBuf) -> Self {
        Self { proc_root }
    }

    fn status(&self, pid: i32) -> Option<String> {
        fs::read_to_string(self.proc_root.join(pid.to_string()).join("status")).ok()
    }

    fn status_field<'a>(status: &'a str, label: &str) -> Option<&'a str> {
        status.lines().find_map(|line| line.strip_prefix(label)).map(str::trim)
    }
}

impl Default for ProcTaskTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskTable for ProcTaskTable {
    fn find_task(&self, pid: i32) -> Option<TaskHandle> {
        self.status(pid).map(|_| TaskHandle(pid))
    }

    fn task_group_leader(&self, task: TaskHandle) -> TaskHandle {
        let Some(status) = self.status(task.pid()) else {
            return task;
        };
        Self::status_field(&status, "Tgid:")
            .and_then(|v| v.parse().ok())
            .map(TaskHandle)
            .unwrap_or(task)
    }

    fn iterate_thread_group(&self, leader: TaskHandle) -> Vec<TaskHandle> {
        let task_dir = self.proc_root.join(leader.pid().to_string()).join("task");
        let Ok(entries) = fs::read_dir(&task_dir) else {
            return vec![leader];
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str().and_then(|s| s.parse().ok()))
            .map(TaskHandle)
            .collect()
    }

    fn host_state(&self, task: TaskHandle) -> HostProcessState {
        let Some(status) = self.status(task.pid()) else {
            return HostProcessState::Other;
        };
        match Self::status_field(&status, "State:").and_then(|v| v.chars().next()) {
            Some('R') | Some('S') | Some('D') => HostProcessState::Running,
            Some('T') | Some('t') => HostProcessState::Stopped,
            _ => HostProcessState::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_status(dir: &std::path::Path, pid: i32, tgid: i32, state: &str) {
        let pid_dir = dir.join(pid.to_string());
        fs::create_dir_all(&pid_dir).unwrap();
        fs::write(pid_dir.join("status"), format!("Name:\ttest\nState:\t{state} (stopped)\nTgid:\t{tgid}\n")).unwrap();
    }

    #[test]
    fn reads_group_leader_and_state_from_status_file() {
        let dir = tempfile::tempdir().unwrap();
        write_status(dir.path(), 200, 100, "T");
        let table = ProcTaskTable::with_root(dir.path().to_path_buf());

        assert_eq!(table.task_group_leader(TaskHandle(200)), TaskHandle(100));
        assert_eq!(table.host_state(TaskHandle(200)), HostProcessState::Stopped);
    }

    #[test]
    fn missing_proc_entry_reports_other_state() {
        let dir = tempfile::tempdir().unwrap();
        let table = ProcTaskTable::with_root(dir.path().to_path_buf());
        assert_eq!(table.host_state(TaskHandle(9999)), HostProcessState::Other);
        assert!(table.find_task(9999).is_none());
    }

    #[test]
    fn thread_group_falls_back_to_leader_without_task_dir() {
        let dir = tempfile::tempdir().unwrap();
        write_status(dir.path(), 100, 100, "R");
        let table = ProcTaskTable::with_root(dir.path().to_path_buf());
        assert_eq!(table.iterate_thread_group(TaskHandle(100)), vec![TaskHandle(100)]);
    }
}
