// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The DMA engine manager: splits a caller's transfer request into
//! hardware-sized descriptors, posts them to a descriptor ring, and tracks
//! their completion.
//!
//! The public entry point is [`Engine`]. A caller builds a [`Request`],
//! submits it to get back a [`ReqList`], and then polls or waits on that
//! list for completion.

mod engine;
mod reqlist;
mod ring;
mod splitter;
mod strcopy;

pub use engine::Engine;
pub use reqlist::{AggregateStatus, ReqEntryStatus, ReqList};

use ve_hal::{AddrKind, Address};

/// Minimum alignment, in bytes, the hardware requires of every transfer
/// endpoint and length.
pub const ALIGN: u64 = 8;

/// Largest length a single [`Request`] may carry. One hardware descriptor
/// cannot express a length that does not fit this bound, so the splitter
/// never has to deal with 64-bit wraparound while accumulating offsets.
pub const MAX_LENGTH: u64 = 0x7FFF_FFFF_FFFF_FFF8;

/// Number of hardware descriptor slots in the ring. Fixed at construction
/// time per [`Engine::open`], this is the compile-time default used when a
/// caller does not override it.
pub const DEFAULT_NUM_DESC: usize = 32;

/// Largest single-descriptor transfer the hardware ring can carry. Requests
/// longer than this are split into multiple descriptors by the splitter.
pub const HW_MAX_DESC_LEN: u64 = 0x0010_0000;

/// Errors a DMA transfer can fail with.
#[derive(Debug, thiserror::Error)]
pub enum DmaError {
    #[error("request length {0} exceeds the maximum of {MAX_LENGTH}")]
    TooLarge(u64),
    #[error("address {0} is not {ALIGN}-byte aligned")]
    Unaligned(Address),
    #[error("length {0} is not {ALIGN}-byte aligned")]
    LengthUnaligned(u64),
    #[error("zero-length request")]
    EmptyRequest,
    #[error("destination {0} is read-only")]
    ReadOnly(Address),
    #[error(transparent)]
    Translation(#[from] ve_hal::HalError),
    #[error("engine is shutting down")]
    ShuttingDown,
    #[error("request was terminated before completion")]
    Terminated,
    #[error("hardware reported a transfer error")]
    HardwareError,
    #[error("wait timed out before the request completed")]
    TimedOut,
    #[error("destination buffer is too small to hold {wanted} bytes (got {available})")]
    Oversize { wanted: usize, available: usize },
    #[error("no NUL terminator found within {0} bytes")]
    NullNotFound(usize),
}

/// A caller's transfer request: move `length` bytes from `src` to `dst`.
///
/// Submitted to [`Engine::submit`], which splits it across page boundaries
/// and hardware descriptor-length limits into a [`ReqList`].
#[derive(Debug, Clone, Copy)]
pub struct Request {
    pub src: Address,
    pub dst: Address,
    pub length: u64,
}

impl Request {
    pub fn new(src: Address, dst: Address, length: u64) -> Self {
        Self { src, dst, length }
    }

    pub(crate) fn validate(&self) -> Result<(), DmaError> {
        if self.length == 0 {
            return Err(DmaError::EmptyRequest);
        }
        if self.length > MAX_LENGTH {
            return Err(DmaError::TooLarge(self.length));
        }
        if self.length % ALIGN != 0 {
            return Err(DmaError::LengthUnaligned(self.length));
        }
        if self.src.addr % ALIGN != 0 {
            return Err(DmaError::Unaligned(self.src));
        }
        if self.dst.addr % ALIGN != 0 {
            return Err(DmaError::Unaligned(self.dst));
        }
        if matches!(self.dst.kind, AddrKind::VaRegPhys) {
            // Register-array physical space is read-only from the DMA
            // engine's perspective; only HostPhys/VaPhys/VaVirt* are valid
            // write destinations.
            return Err(DmaError::ReadOnly(self.dst));
        }
        Ok(())
    }
}
