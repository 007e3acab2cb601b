// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! An in-memory per-task register file. Tests declare which task (if any)
//! is "current" on the single emulated core, so `is_current`/`halt` have
//! something meaningful to answer.

use parking_lot::Mutex;
use std::collections::HashMap;
use ve_hal::{CoreControl, HalError, TaskHandle, TaskRegisters};

#[derive(Default)]
pub struct EmulatedCoreControl {
    registers: Mutex<HashMap<i32, TaskRegisters>>,
    current: Mutex<Option<i32>>,
    halted: Mutex<Vec<i32>>,
}

impl EmulatedCoreControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a task's register file (defaulting to all-zero) and marks it
    /// the task currently resident on the emulated core.
    pub fn set_current(&self, pid: i32) {
        self.registers.lock().entry(pid).or_default();
        *self.current.lock() = Some(pid);
    }

    pub fn was_halted(&self, pid: i32) -> bool {
        self.halted.lock().contains(&pid)
    }
}

impl CoreControl for EmulatedCoreControl {
    fn read_registers(&self, task: TaskHandle) -> Result<TaskRegisters, HalError> {
        self.registers
            .lock()
            .get(&task.pid())
            .copied()
            .ok_or(HalError::TaskNotFound(task.pid()))
    }

    fn write_registers(&self, task: TaskHandle, regs: &TaskRegisters) -> Result<(), HalError> {
        self.registers.lock().insert(task.pid(), *regs);
        Ok(())
    }

    fn is_current(&self, task: TaskHandle) -> bool {
        *self.current.lock() == Some(task.pid())
    }

    fn halt(&self, task: TaskHandle) {
        self.halted.lock().push(task.pid());
    }
}
