// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Trait contracts for the collaborators the DMA engine manager and signal
//! delivery core treat as external: virtual-to-physical translation,
//! control-register I/O, the command transport to the supervisor daemon, and
//! the read-only process/thread table.
//!
//! This crate has no hardware-specific code. A production binary implements
//! these traits against the real accelerator; `ve_hal_emulated` implements
//! them in memory for tests and local development, mirroring the
//! `DeviceBacking`/emulated-device split used elsewhere in this codebase.

pub mod mask;
pub mod ring_layout;

use std::fmt;

/// The six address spaces a DMA request can name an endpoint in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddrKind {
    /// Host virtual address, resolved in the context of a host process.
    HostVirt,
    /// Host physical address; process id is ignored.
    HostPhys,
    /// Accelerator virtual address, protection-checked.
    VaVirt,
    /// Accelerator virtual address, protection check skipped.
    VaVirtNoProtCheck,
    /// Accelerator physical address; process id is ignored.
    VaPhys,
    /// Accelerator register-array physical address; process id is ignored.
    VaRegPhys,
}

impl AddrKind {
    /// True for the two kinds that require a virtual-to-physical lookup.
    pub fn is_virtual(self) -> bool {
        matches!(
            self,
            AddrKind::HostVirt | AddrKind::VaVirt | AddrKind::VaVirtNoProtCheck
        )
    }

    /// True when the protection bits returned by `translate` should be
    /// ignored for this kind.
    pub fn skips_protection_check(self) -> bool {
        matches!(self, AddrKind::VaVirtNoProtCheck)
    }
}

/// An endpoint of a DMA request: an address kind, the raw address, and (for
/// virtual kinds) the owning process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub kind: AddrKind,
    /// Ignored for physical kinds.
    pub pid: i32,
    pub addr: u64,
}

impl Address {
    pub fn virt(kind: AddrKind, pid: i32, addr: u64) -> Self {
        Self { kind, pid, addr }
    }

    pub fn phys(kind: AddrKind, addr: u64) -> Self {
        Self { kind, pid: 0, addr }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind.is_virtual() {
            write!(f, "{:?}(pid={}, 0x{:x})", self.kind, self.pid, self.addr)
        } else {
            write!(f, "{:?}(0x{:x})", self.kind, self.addr)
        }
    }
}

/// The result of resolving a virtual address to physical memory.
#[derive(Debug, Clone, Copy)]
pub struct Translation {
    pub phys_addr: u64,
    /// Size, in bytes, of the page this translation covers. Used to find the
    /// page boundary for splitting.
    pub page_size: u64,
    pub writable: bool,
}

/// Errors the hardware abstraction layer itself can report. Component-level
/// errors (`dma_engine::DmaError`, `signal_core::SignalError`) wrap these.
#[derive(Debug, thiserror::Error)]
pub enum HalError {
    #[error("failed to translate {addr} for pid {pid} (want_write={want_write})")]
    Translation {
        addr: u64,
        pid: i32,
        want_write: bool,
    },
    #[error("destination address is read-only")]
    ReadOnly,
    #[error("command transport failure: {0}")]
    Transport(String),
    #[error("task {0} not found")]
    TaskNotFound(i32),
}

/// Resolves addresses in a process's accelerator address space to physical
/// memory. Implemented by the page-table walker on the real system; backed
/// by a flat map in `ve_hal_emulated`.
pub trait Translate: Send + Sync {
    fn translate(&self, pid: i32, virt_addr: u64, want_write: bool) -> Result<Translation, HalError>;
}

/// Mapped register access plus the fence primitive that publishes all prior
/// stores before any later store becomes visible to hardware.
///
/// This is deliberately low-level (byte-offset word reads/writes), the same
/// shape as the teacher's `DeviceRegisterIo`: higher layers (`HwDescRing`)
/// interpret offsets according to the hardware layout they own.
pub trait RegisterIo: Send + Sync {
    fn read_u32(&self, offset: usize) -> u32;
    fn write_u32(&self, offset: usize, value: u32);
    fn read_u64(&self, offset: usize) -> u64;
    fn write_u64(&self, offset: usize, value: u64);
    /// Ensures all prior register/memory stores are globally visible before
    /// any store issued after this call.
    fn fence(&self);
}

/// The length-prefixed request/response socket to the supervisor daemon.
/// The core only ever needs this one round trip.
pub trait CommandTransport: Send + Sync {
    fn submit_and_await(&self, handle: u64, request: &[u8]) -> Result<Vec<u8>, HalError>;
}

/// Read-only view over the host's process/thread table.
pub trait TaskTable: Send + Sync {
    fn find_task(&self, pid: i32) -> Option<TaskHandle>;
    fn task_group_leader(&self, task: TaskHandle) -> TaskHandle;
    fn iterate_thread_group(&self, leader: TaskHandle) -> Vec<TaskHandle>;
    /// Coarse `/proc`-style run state of the host-side pseudo process
    /// backing `task`. Used by group actions that only apply while the host
    /// observes the process stopped.
    fn host_state(&self, task: TaskHandle) -> HostProcessState;
}

/// Coarse run state of a task's host-side pseudo process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostProcessState {
    Running,
    Stopped,
    Other,
}

/// Delivers host-visible effects of accelerator process termination. The
/// accelerator core itself cannot kill the host pseudo process that
/// represents it; that always goes through the host.
pub trait HostNotify: Send + Sync {
    fn kill(&self, pid: i32, sig: u32);
}

/// An opaque, cheap-to-copy reference to a row in the process/thread table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(pub i32);

impl TaskHandle {
    pub fn pid(self) -> i32 {
        self.0
    }
}

/// Number of general-purpose registers in the accelerator's per-task
/// register file. Large enough to hold every architectural register a
/// signal frame needs to save; the exact register assignment is opaque to
/// this layer.
pub const GPR_COUNT: usize = 32;

/// The accelerator's per-task register file, as read from or written to a
/// core. Also doubles as the `mcontext` payload of a saved signal frame, so
/// `setup_frame`/`restore_context` round-trip it bit-exact.
#[repr(C)]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    zerocopy::IntoBytes,
    zerocopy::FromBytes,
    zerocopy::Immutable,
    zerocopy::KnownLayout,
)]
pub struct TaskRegisters {
    pub gpr: [u64; GPR_COUNT],
    pub ip: u64,
    pub sp: u64,
    pub link: u64,
    pub outer_context: u64,
    pub flags: u64,
    pub altstack_base: u64,
}

/// Access to a task's live register file and its core.
///
/// Unlike [`RegisterIo`], which addresses the DMA ring's control registers,
/// this addresses the accelerator core executing a given task: reading or
/// overwriting its architectural register file, and halting a core the task
/// is currently resident on so its registers are safe to snapshot.
pub trait CoreControl: Send + Sync {
    fn read_registers(&self, task: TaskHandle) -> Result<TaskRegisters, HalError>;
    fn write_registers(&self, task: TaskHandle, regs: &TaskRegisters) -> Result<(), HalError>;
    /// True if `task` is the thread currently resident on an accelerator
    /// core (as opposed to swapped out / not yet scheduled).
    fn is_current(&self, task: TaskHandle) -> bool;
    /// Halts the core `task` is resident on. No-op if it is not resident.
    fn halt(&self, task: TaskHandle);
}
