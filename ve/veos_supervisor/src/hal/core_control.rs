// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Register read/write and core halt, issued over the supervisor daemon's
//! command socket rather than directly: the accelerator core a task is
//! resident on is owned by the daemon, not this process.

use std::sync::Arc;
use ve_hal::{CommandTransport, CoreControl, HalError, TaskHandle, TaskRegisters};
use zerocopy::{FromBytes, IntoBytes};

const OP_READ_REGISTERS: u8 = 1;
const OP_WRITE_REGISTERS: u8 = 2;
const OP_IS_CURRENT: u8 = 3;
const OP_HALT: u8 = 4;

pub struct DriverCoreControl {
    transport: Arc<dyn CommandTransport>,
}

impl DriverCoreControl {
    pub fn new(transport: Arc<dyn CommandTransport>) -> Self {
        Self { transport }
    }
}

impl CoreControl for DriverCoreControl {
    fn read_registers(&self, task: TaskHandle) -> Result<TaskRegisters, HalError> {
        let reply = self.transport.submit_and_await(task.pid() as u64, &[OP_READ_REGISTERS])?;
        TaskRegisters::read_from_bytes(&reply)
            .map_err(|_| HalError::Transport(format!("read_registers reply had {} bytes, want {}", reply.len(), std::mem::size_of::<TaskRegisters>())))
    }

    fn write_registers(&self, task: TaskHandle, regs: &TaskRegisters) -> Result<(), HalError> {
        let mut request = Vec::with_capacity(1 + std::mem::size_of::<TaskRegisters>());
        request.push(OP_WRITE_REGISTERS);
        request.extend_from_slice(regs.as_bytes());
        let reply = self.transport.submit_and_await(task.pid() as u64, &request)?;
        if reply.first() != Some(&1) {
            return Err(HalError::Transport(format!("write_registers rejected for pid {}", task.pid())));
        }
        Ok(())
    }

    fn is_current(&self, task: TaskHandle) -> bool {
        self.transport
            .submit_and_await(task.pid() as u64, &[OP_IS_CURRENT])
            .map(|reply| reply.first() == Some(&1))
            .unwrap_or(false)
    }

    fn halt(&self, task: TaskHandle) {
        let _ = self.transport.submit_and_await(task.pid() as u64, &[OP_HALT]);
    }
}
