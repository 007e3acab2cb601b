// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Production implementations of `ve_hal`'s collaborator traits, backed by
//! the real accelerator device node, `/proc`, and the supervisor daemon's
//! command socket.

mod core_control;
mod host_notify;
mod registers;
mod task_table;
mod translate;
mod transport;

pub use core_control::DriverCoreControl;
pub use host_notify::KillHostNotify;
pub use registers::MmapRegisterIo;
pub use task_table::ProcTaskTable;
pub use translate::DriverTranslate;
pub use transport::UnixCommandTransport;
