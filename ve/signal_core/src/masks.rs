// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Fixed signal-set masks computed once from `nix::sys::signal::Signal`
//! rather than hardcoded numeric constants, so the set always matches the
//! host's own signal numbering.

use std::sync::OnceLock;
use ve_hal::mask::SigMask;

fn signal_set(signals: &[nix::sys::signal::Signal]) -> SigMask {
    SigMask::from_signals(signals.iter().map(|s| *s as u32))
}

/// `SIGSTOP`, `SIGTSTP`, `SIGTTIN`, `SIGTTOU`: the signals whose default
/// action stops the process.
pub fn stopping_mask() -> SigMask {
    use nix::sys::signal::Signal::*;
    static MASK: OnceLock<SigMask> = OnceLock::new();
    *MASK.get_or_init(|| signal_set(&[SIGSTOP, SIGTSTP, SIGTTIN, SIGTTOU]))
}

/// Signals raised synchronously by the accelerator core itself in response
/// to an executed instruction (as opposed to an asynchronous notification).
/// `dequeue` prefers a pending member of this set over any other pending
/// signal, since it reflects a fault the task cannot simply resume past.
pub fn synchronous_mask() -> SigMask {
    use nix::sys::signal::Signal::*;
    static MASK: OnceLock<SigMask> = OnceLock::new();
    *MASK.get_or_init(|| signal_set(&[SIGILL, SIGTRAP, SIGABRT, SIGBUS, SIGFPE, SIGSEGV, SIGSYS]))
}

/// `SIGCONT`, as its own mask: arrival always wakes a stopped process and
/// discards pending stop signals, regardless of the installed handler.
pub fn continue_mask() -> SigMask {
    use nix::sys::signal::Signal::SIGCONT;
    static MASK: OnceLock<SigMask> = OnceLock::new();
    *MASK.get_or_init(|| signal_set(&[SIGCONT]))
}

/// Signals whose default disposition is to be silently discarded.
pub fn default_ignored_mask() -> SigMask {
    use nix::sys::signal::Signal::*;
    static MASK: OnceLock<SigMask> = OnceLock::new();
    *MASK.get_or_init(|| signal_set(&[SIGCHLD, SIGURG, SIGWINCH]))
}

/// Signals whose default disposition is to dump core before terminating.
pub fn default_coredump_mask() -> SigMask {
    use nix::sys::signal::Signal::*;
    static MASK: OnceLock<SigMask> = OnceLock::new();
    *MASK.get_or_init(|| signal_set(&[SIGQUIT, SIGILL, SIGABRT, SIGFPE, SIGSEGV, SIGBUS, SIGSYS, SIGTRAP, SIGXCPU, SIGXFSZ]))
}

/// True for signal numbers in the real-time range, which never coalesce
/// with an already-pending instance of the same number.
pub fn is_realtime(sig: u32) -> bool {
    sig >= libc::SIGRTMIN() as u32
}
