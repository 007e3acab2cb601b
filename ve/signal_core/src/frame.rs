// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The signal handler stack frame written into accelerator memory on
//! handler entry and read back on `restore_context`.
//!
//! The byte layout is an ABI shared with the accelerator's user-mode
//! trampoline code, not a Rust-side convenience format: field order and
//! width are bit-exact and fixed at compile time. `SigFrame` is laid out
//! with no implicit padding so `zerocopy` can cast it to and from bytes
//! directly.

use crate::action::flags;
use crate::queue::SigInfo;
use ve_hal::TaskRegisters;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Trampoline instructions written at the start of every frame, little
/// endian, bit-exact. The accelerator treats these as opaque machine code
/// executed on return from the handler; this crate never interprets them.
pub const TRAMPOLINE: [u64; 5] = [
    0x462eaeae00000000,
    0x012e008e00000018,
    0x45000f0000000000,
    0x310003ae00000000,
    0x3f00000000000000,
];

/// Size, in bytes, of the handler-local scratch area below the saved
/// context. `setup_frame` places the new stack pointer this far below the
/// frame address; `restore_context` adds it back to recover the frame
/// address from the current stack pointer.
pub const HANDLER_STACK_FRAME: u64 = 176;

/// Size of the local-shared-memory scratch region copied into and out of
/// every frame.
pub const LSHM_SZ: usize = 256;

#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
struct SigInfoWire {
    addr: u64,
    pid: i32,
    uid: u32,
    status: i32,
    code: i32,
}

impl From<SigInfo> for SigInfoWire {
    fn from(i: SigInfo) -> Self {
        Self { addr: i.addr, pid: i.pid, uid: i.uid, status: i.status, code: i.code }
    }
}

impl From<SigInfoWire> for SigInfo {
    fn from(w: SigInfoWire) -> Self {
        Self { addr: w.addr, pid: w.pid, uid: w.uid, status: w.status, code: w.code }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
struct UContextWire {
    flags: u64,
    link: u64,
    ss_sp: u64,
    ss_size: u64,
    /// Lower word of the saved blocked mask. The frame ABI only ever
    /// carried one word; signals above bit 63 round-trip through the wider
    /// in-memory `SigMask` everywhere else, but not across a handler
    /// invocation. Documented, not fixed: changing this widens the ABI.
    sigmask: u64,
    ss_flags: i32,
    _reserved: i32,
    mcontext: TaskRegisters,
}

/// Descriptor of the alternate signal stack, as recorded in a frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct AltStackFrame {
    pub sp: u64,
    pub flags: i32,
    pub size: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct SigFrame {
    trampoline: [u64; 5],
    siginfo: SigInfoWire,
    ucontext: UContextWire,
    lshm_scratch: [u8; LSHM_SZ],
    fatal: u32,
    signum: i32,
}

/// `fatal` bit of the frame's `fatal` word: set when `restore_context`
/// should ask the host to terminate the task instead of resuming it.
pub const FATAL: u32 = 1 << 0;
/// `fatal` bit recording that the signal this frame was built for arrived
/// synchronously (from an accelerator-core exception) rather than
/// asynchronously; not part of the original wire layout's named fields, but
/// packed into `fatal`'s spare bits rather than widening the ABI.
pub const SYNC_EXCEPTION: u32 = 1 << 1;

impl SigFrame {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        siginfo: SigInfo,
        saved_mask_word0: u64,
        alt_stack: AltStackFrame,
        mcontext: TaskRegisters,
        lshm_scratch: [u8; LSHM_SZ],
        fatal: bool,
        sync_exception: bool,
        signum: i32,
    ) -> Self {
        let mut fatal_word = if fatal { FATAL } else { 0 };
        if sync_exception {
            fatal_word |= SYNC_EXCEPTION;
        }
        Self {
            trampoline: TRAMPOLINE,
            siginfo: siginfo.into(),
            ucontext: UContextWire {
                flags: if alt_stack.flags & flags::ONSTACK as i32 != 0 { flags::ONSTACK as u64 } else { 0 },
                link: 0,
                ss_sp: alt_stack.sp,
                ss_size: alt_stack.size,
                sigmask: saved_mask_word0,
                ss_flags: alt_stack.flags,
                _reserved: 0,
                mcontext,
            },
            lshm_scratch,
            fatal: fatal_word,
            signum,
        }
    }

    pub fn siginfo(&self) -> SigInfo {
        self.siginfo.into()
    }

    pub fn saved_mask_word0(&self) -> u64 {
        self.ucontext.sigmask
    }

    pub fn mcontext(&self) -> TaskRegisters {
        self.ucontext.mcontext
    }

    pub fn lshm_scratch(&self) -> [u8; LSHM_SZ] {
        self.lshm_scratch
    }

    pub fn fatal(&self) -> bool {
        self.fatal & FATAL != 0
    }

    pub fn sync_exception(&self) -> bool {
        self.fatal & SYNC_EXCEPTION != 0
    }

    pub fn signum(&self) -> i32 {
        self.signum
    }

    pub fn as_bytes(&self) -> &[u8] {
        IntoBytes::as_bytes(self)
    }

    pub fn ref_from_bytes(bytes: &[u8]) -> Option<&Self> {
        <Self as FromBytes>::ref_from_bytes(bytes).ok()
    }
}

pub const SIG_FRAME_SIZE: usize = std::mem::size_of::<SigFrame>();
pub const SIGINFO_OFFSET: usize = std::mem::offset_of!(SigFrame, siginfo);
pub const UCONTEXT_OFFSET: usize = std::mem::offset_of!(SigFrame, ucontext);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size_has_no_implicit_padding() {
        assert_eq!(SIG_FRAME_SIZE % 8, 0);
    }

    #[test]
    fn round_trips_through_bytes() {
        let mut mcontext = TaskRegisters::default();
        mcontext.gpr[3] = 0xdead_beef;
        mcontext.ip = 0x1000;
        let frame = SigFrame::build(
            SigInfo { code: 1, pid: 42, uid: 1000, addr: 0x2000, status: 0 },
            0xff,
            AltStackFrame { sp: 0x5000, flags: flags::ONSTACK as i32, size: 4096 },
            mcontext,
            [7u8; LSHM_SZ],
            false,
            true,
            11,
        );
        let bytes = frame.as_bytes().to_vec();
        let restored = SigFrame::ref_from_bytes(&bytes).expect("frame bytes parse back");
        assert_eq!(restored.mcontext(), mcontext);
        assert_eq!(restored.signum(), 11);
        assert_eq!(restored.saved_mask_word0(), 0xff);
        assert!(!restored.fatal());
        assert!(restored.sync_exception());
    }
}
