// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Chooses and delivers the next pending signal for a task, and restores
//! its context when the accelerator executes the trampoline's sigreturn.

use crate::action::{self, flags, DefaultAction, SigHandler};
use crate::frame::{AltStackFrame, SigFrame, SIGINFO_OFFSET, SIG_FRAME_SIZE, UCONTEXT_OFFSET};
use crate::group::GroupCoordinator;
use crate::queue::SigInfo;
use crate::task::{OngoingAction, RunState, SyscallOutcome, Task};
use crate::SignalError;
use dma_engine::Engine;
use std::sync::Arc;
use tracing::{debug, info_span};
use ve_hal::mask::SigMask;
use ve_hal::{AddrKind, Address, CoreControl, HostNotify, Translate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Nothing was pending (or everything pending was ignored).
    None,
    Delivered,
    Stopped,
    /// The task is on its way to termination (core-dump or direct kill);
    /// the caller should not resume it.
    Terminating,
}

pub struct SigDelivery {
    translate: Arc<dyn Translate>,
    core: Arc<dyn CoreControl>,
    dma: Arc<Engine>,
    host: Arc<dyn HostNotify>,
}

impl SigDelivery {
    pub fn new(translate: Arc<dyn Translate>, core: Arc<dyn CoreControl>, dma: Arc<Engine>, host: Arc<dyn HostNotify>) -> Self {
        Self { translate, core, dma, host }
    }

    /// Entry point called by the per-core scheduling loop before resuming
    /// `task`.
    pub fn deliver_pending(&self, task: &Arc<Task>, group: &GroupCoordinator<'_>) -> Result<DeliveryOutcome, SignalError> {
        let _span = info_span!("sig_delivery", pid = task.pid).entered();

        if task.state().ongoing_action == OngoingAction::CoreDump {
            task.state().run_state = RunState::Stop;
            return Ok(DeliveryOutcome::None);
        }

        loop {
            let blocked = task.state().blocked;
            let dequeued = task.state().queue.dequeue(blocked);
            let Some(dequeued) = dequeued else {
                self.on_nothing_pending(task);
                return Ok(DeliveryOutcome::None);
            };

            let handler = task.state().handler(dequeued.sig);
            match handler.handler {
                SigHandler::Ignore => continue,
                SigHandler::User { handler_addr } => {
                    if self.setup_frame(task, dequeued.sig, dequeued.info, dequeued.sync_exception, handler_addr, handler.flags)? {
                        let mut state = task.state();
                        let mut new_blocked = state.blocked.union(&handler.mask);
                        if handler.flags & flags::NODEFER == 0 {
                            new_blocked.set(dequeued.sig);
                        }
                        state.blocked = new_blocked;
                        if handler.flags & flags::RESETHAND != 0 {
                            state.set_handler(dequeued.sig, Default::default());
                        }
                        state.saved_mask_valid = false;
                        debug!(sig = dequeued.sig, "signal delivered to user handler");
                        return Ok(DeliveryOutcome::Delivered);
                    }
                    // setup_frame forced SIGSEGV into the queue; loop again
                    // to dequeue and deliver it instead.
                    continue;
                }
                SigHandler::Default => match action::default_action(dequeued.sig) {
                    DefaultAction::Ignore | DefaultAction::Continue => continue,
                    DefaultAction::Stop => {
                        group.stop(task.state().group_leader, self.core.as_ref());
                        return Ok(DeliveryOutcome::Stopped);
                    }
                    DefaultAction::CoreDump => {
                        let mut state = task.state();
                        state.ongoing_action = OngoingAction::CoreDump;
                        state.coredump_signal = dequeued.sig;
                        state.run_state = RunState::Stop;
                        drop(state);
                        debug!(sig = dequeued.sig, "default action is core dump");
                        return Ok(DeliveryOutcome::Terminating);
                    }
                    DefaultAction::Terminate => {
                        self.host.kill(task.pid, dequeued.sig);
                        return Ok(DeliveryOutcome::Terminating);
                    }
                },
            }
        }
    }

    fn on_nothing_pending(&self, task: &Arc<Task>) {
        let mut state = task.state();
        if state.saved_mask_valid {
            state.blocked = state.saved_mask;
            state.saved_mask_valid = false;
        }
        let outcome = state.last_syscall;
        state.last_syscall = SyscallOutcome::None;
        drop(state);
        match outcome {
            SyscallOutcome::Restart => {
                if let Ok(mut regs) = self.core.read_registers(task.handle()) {
                    regs.ip = regs.ip.wrapping_sub(8);
                    let _ = self.core.write_registers(task.handle(), &regs);
                }
            }
            SyscallOutcome::NoRestart => {
                if let Ok(mut regs) = self.core.read_registers(task.handle()) {
                    const EINTR: u64 = u64::MAX - 3; // -4 two's complement, matching errno -EINTR
                    regs.gpr[0] = EINTR;
                    let _ = self.core.write_registers(task.handle(), &regs);
                }
            }
            SyscallOutcome::None => {}
        }
    }

    /// Builds and writes a handler frame. Returns `Ok(true)` on success,
    /// `Ok(false)` if frame setup failed and `SIGSEGV` was forced into the
    /// queue instead (the caller should loop and try delivery again).
    fn setup_frame(
        &self,
        task: &Arc<Task>,
        sig: u32,
        info: SigInfo,
        sync_exception: bool,
        handler_addr: u64,
        handler_flags: u32,
    ) -> Result<bool, SignalError> {
        let current_regs = self.core.read_registers(task.handle())?;

        let (frame_vaddr, uses_alt_stack) = {
            let state = task.state();
            let wants_alt_stack = handler_flags & flags::ONSTACK != 0 && !state.on_alt_stack && !state.alt_stack.is_disabled();
            let addr = if wants_alt_stack {
                state.alt_stack.sp + state.alt_stack.size - SIG_FRAME_SIZE as u64
            } else {
                current_regs.sp - SIG_FRAME_SIZE as u64
            };
            (addr, wants_alt_stack)
        };

        let phys = match self.translate.translate(task.pid, frame_vaddr, true) {
            Ok(t) => t.phys_addr,
            Err(_) => {
                self.force_sigsegv(task);
                return Ok(false);
            }
        };

        let frame = {
            let state = task.state();
            let saved_mask = if state.saved_mask_valid { state.saved_mask } else { state.blocked };
            let alt_stack_frame = AltStackFrame { sp: state.alt_stack.sp, size: state.alt_stack.size, flags: state.alt_stack.flags };
            SigFrame::build(
                info,
                saved_mask.words()[0],
                alt_stack_frame,
                current_regs,
                state.lshm_scratch,
                false,
                sync_exception,
                sig as i32,
            )
        };

        if self.dma.send_bytes(frame.as_bytes(), Address::phys(AddrKind::VaPhys, phys)).is_err() {
            self.force_sigsegv(task);
            return Ok(false);
        }

        let mut new_regs = current_regs;
        new_regs.ip = handler_addr;
        new_regs.outer_context = handler_addr;
        new_regs.gpr[0] = sig as u64;
        new_regs.gpr[1] = frame_vaddr + SIGINFO_OFFSET as u64;
        new_regs.gpr[2] = frame_vaddr + UCONTEXT_OFFSET as u64;
        new_regs.link = frame_vaddr;
        new_regs.sp = frame_vaddr - crate::frame::HANDLER_STACK_FRAME;
        if uses_alt_stack {
            new_regs.altstack_base = task.state().alt_stack.sp;
        }
        self.core.write_registers(task.handle(), &new_regs)?;
        task.state().on_alt_stack = uses_alt_stack;
        Ok(true)
    }

    fn force_sigsegv(&self, task: &Arc<Task>) {
        use nix::sys::signal::Signal::SIGSEGV;
        let sig = SIGSEGV as u32;
        let mut state = task.state();
        state.set_handler(sig, Default::default());
        state.queue.enqueue(sig, SigInfo::default(), true, true);
    }

    /// Invoked when the accelerator executes the trampoline's sigreturn
    /// equivalent.
    pub fn restore_context(&self, task: &Arc<Task>) -> Result<(), SignalError> {
        let sp = self.core.read_registers(task.handle())?.sp;
        let frame_vaddr = sp + crate::frame::HANDLER_STACK_FRAME;
        let phys = self.translate.translate(task.pid, frame_vaddr, false)?.phys_addr;

        let mut bytes = vec![0u8; SIG_FRAME_SIZE];
        self.dma.recv_bytes(Address::phys(AddrKind::VaPhys, phys), &mut bytes)?;
        let frame = SigFrame::ref_from_bytes(&bytes).ok_or(SignalError::MalformedFrame)?;

        self.core.write_registers(task.handle(), &frame.mcontext())?;

        let fatal = frame.fatal();
        let signum = frame.signum();
        let saved_word0 = frame.saved_mask_word0();

        let mut state = task.state();
        state.lshm_scratch = frame.lshm_scratch();
        let existing = state.blocked.words();
        state.blocked = SigMask::from_words([saved_word0, existing[1]]);
        let pending = state.sigpending();
        drop(state);

        if fatal {
            self.host.kill(task.pid, signum as u32);
        }
        debug!(pid = task.pid, sigpending = pending, "context restored");
        Ok(())
    }
}
