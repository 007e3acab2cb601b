// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::masks;
use ve_hal::mask::SigMask;

/// `sa_flags` bits relevant to frame setup and handler re-arming.
pub mod flags {
    pub const ONSTACK: u32 = 1 << 0;
    pub const RESTART: u32 = 1 << 1;
    pub const RESETHAND: u32 = 1 << 2;
    pub const NODEFER: u32 = 1 << 3;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigHandler {
    Default,
    Ignore,
    User { handler_addr: u64 },
}

#[derive(Debug, Clone, Copy)]
pub struct SigAction {
    pub handler: SigHandler,
    /// `sa_mask`: additional signals blocked for the duration of the handler.
    pub mask: SigMask,
    pub flags: u32,
}

impl Default for SigAction {
    fn default() -> Self {
        Self { handler: SigHandler::Default, mask: SigMask::EMPTY, flags: 0 }
    }
}

/// What happens to a task when `sig` arrives with `SigHandler::Default`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultAction {
    Ignore,
    Stop,
    Continue,
    CoreDump,
    Terminate,
}

pub fn default_action(sig: u32) -> DefaultAction {
    if masks::continue_mask().test(sig) {
        return DefaultAction::Continue;
    }
    if masks::stopping_mask().test(sig) {
        return DefaultAction::Stop;
    }
    if masks::default_ignored_mask().test(sig) {
        return DefaultAction::Ignore;
    }
    if masks::default_coredump_mask().test(sig) {
        return DefaultAction::CoreDump;
    }
    DefaultAction::Terminate
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::Signal::*;

    #[test]
    fn sigcont_continues_and_sigstop_stops() {
        assert_eq!(default_action(SIGCONT as u32), DefaultAction::Continue);
        assert_eq!(default_action(SIGSTOP as u32), DefaultAction::Stop);
        assert_eq!(default_action(SIGTSTP as u32), DefaultAction::Stop);
    }

    #[test]
    fn sigchld_is_ignored_and_sigsegv_dumps_core() {
        assert_eq!(default_action(SIGCHLD as u32), DefaultAction::Ignore);
        assert_eq!(default_action(SIGSEGV as u32), DefaultAction::CoreDump);
        assert_eq!(default_action(SIGQUIT as u32), DefaultAction::CoreDump);
    }

    #[test]
    fn anything_else_terminates() {
        assert_eq!(default_action(SIGTERM as u32), DefaultAction::Terminate);
        assert_eq!(default_action(SIGUSR1 as u32), DefaultAction::Terminate);
    }

    #[test]
    fn default_sig_action_has_no_handler_and_empty_mask() {
        let action = SigAction::default();
        assert_eq!(action.handler, SigHandler::Default);
        assert!(action.mask.is_empty());
        assert_eq!(action.flags, 0);
    }
}
