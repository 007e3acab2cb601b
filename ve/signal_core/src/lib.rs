// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Signal delivery core: queues pending signals per task, decides default
//! vs. handler disposition, builds the handler stack frame the accelerator
//! trampoline runs, and coordinates group-wide stop/continue/core-dump
//! actions.
//!
//! Built on the same collaborator traits `dma_engine` uses ([`ve_hal`]'s
//! `Translate`/`TaskTable`), plus two more this crate adds:
//! `CoreControl` (read/write a task's register file, halt its core) and
//! `HostNotify` (ask the host to kill the pseudo process backing a task).

pub mod action;
pub mod coredump;
pub mod delivery;
pub mod frame;
pub mod group;
pub mod masks;
pub mod queue;
pub mod task;

pub use action::{DefaultAction, SigAction, SigHandler};
pub use coredump::{CoreDumpError, CoreDumpSession};
pub use delivery::{DeliveryOutcome, SigDelivery};
pub use frame::SigFrame;
pub use group::{GroupAction, GroupCoordinator};
pub use queue::{SigInfo, SigQueue};
pub use task::{Task, TaskRegistry, TaskSignalState};

/// Errors this crate reports to its caller. Wraps the hardware abstraction
/// layer's and the DMA engine manager's own error types rather than
/// duplicating them.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error(transparent)]
    Hal(#[from] ve_hal::HalError),
    #[error(transparent)]
    Dma(#[from] dma_engine::DmaError),
    #[error("signal frame bytes did not parse back into a valid frame")]
    MalformedFrame,
    #[error(transparent)]
    CoreDump(#[from] coredump::CoreDumpError),
    #[error("no task registered for pid {0}")]
    UnknownTask(i32),
}
