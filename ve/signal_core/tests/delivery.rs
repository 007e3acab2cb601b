// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use dma_engine::Engine;
use nix::sys::signal::Signal::{SIGSEGV, SIGUSR1};
use signal_core::action::flags;
use signal_core::task::SyscallOutcome;
use signal_core::{CoreDumpSession, DeliveryOutcome, GroupCoordinator, SigAction, SigDelivery, SigHandler, SigInfo, TaskRegistry};
use std::sync::Arc;
use ve_hal::mask::SigMask;
use ve_hal::{CoreControl, TaskHandle, TaskRegisters, Translate};
use ve_hal_emulated::{EmulatedCoreControl, EmulatedHostNotify, EmulatedRegisterIo, EmulatedTaskTable, EmulatedTranslate};

const NUM_DESC: usize = 4;

fn open_delivery(num_desc: usize) -> (SigDelivery, Arc<EmulatedCoreControl>, Arc<EmulatedHostNotify>) {
    let regs = EmulatedRegisterIo::new(num_desc);
    let translate: Arc<dyn Translate> = Arc::new(EmulatedTranslate::new());
    let dma = Engine::open(regs, translate.clone(), num_desc);
    let core = Arc::new(EmulatedCoreControl::new());
    let host = Arc::new(EmulatedHostNotify::new());
    let delivery = SigDelivery::new(translate, core.clone(), dma, host.clone());
    (delivery, core, host)
}

#[test]
fn setup_frame_then_restore_context_round_trips_register_file() {
    let (delivery, core, _host) = open_delivery(NUM_DESC);
    let registry = TaskRegistry::new();
    let task_table = EmulatedTaskTable::new();

    let pid = 100;
    task_table.add_process(pid);
    let task = registry.register(pid, TaskHandle(pid), 64);
    core.set_current(pid);

    // Backed by a real allocation: the emulated register I/O copies through
    // raw pointers, so the frame address has to be real memory, not an
    // arbitrary integer.
    let mut stack = vec![0u8; 4096];
    let base = stack.as_mut_ptr() as u64;
    let sp = base + 3072;

    let mut initial = TaskRegisters::default();
    initial.sp = sp;
    initial.ip = 0x4000;
    initial.gpr[5] = 0xabcd_ef01;
    core.write_registers(task.handle(), &initial).expect("seed registers");

    let sig = SIGUSR1 as u32;
    task.state().set_handler(
        sig,
        SigAction { handler: SigHandler::User { handler_addr: 0x7777 }, mask: SigMask::EMPTY, flags: flags::RESTART },
    );
    task.state().queue.enqueue(sig, SigInfo::default(), false, false);

    let group = GroupCoordinator::new(&registry, &task_table);
    let outcome = delivery.deliver_pending(&task, &group).expect("delivery should succeed");
    assert_eq!(outcome, DeliveryOutcome::Delivered);

    let after_setup = core.read_registers(task.handle()).expect("registers after setup");
    assert_eq!(after_setup.ip, 0x7777);
    assert_ne!(after_setup.sp, sp, "setup_frame must move the stack pointer below the new frame");

    delivery.restore_context(&task).expect("restore should succeed");

    let restored = core.read_registers(task.handle()).expect("registers after restore");
    assert_eq!(restored, initial, "sigreturn must hand the exact pre-signal register file back");
}

#[test]
fn nothing_pending_rewinds_instruction_pointer_for_restartable_syscall() {
    let (delivery, core, _host) = open_delivery(NUM_DESC);
    let registry = TaskRegistry::new();
    let task_table = EmulatedTaskTable::new();

    let pid = 200;
    task_table.add_process(pid);
    let task = registry.register(pid, TaskHandle(pid), 64);
    core.set_current(pid);

    let mut regs = TaskRegisters::default();
    regs.ip = 0x8000;
    core.write_registers(task.handle(), &regs).expect("seed registers");
    task.state().last_syscall = SyscallOutcome::Restart;

    let group = GroupCoordinator::new(&registry, &task_table);
    let outcome = delivery.deliver_pending(&task, &group).expect("delivery should succeed");
    assert_eq!(outcome, DeliveryOutcome::None);

    let after = core.read_registers(task.handle()).expect("registers after dispatch");
    assert_eq!(after.ip, 0x8000 - 8, "a restartable syscall rewinds IP by one instruction");
    assert_eq!(task.state().last_syscall, SyscallOutcome::None, "the outcome is consumed once acted on");
}

#[test]
fn nothing_pending_reports_eintr_for_non_restartable_syscall() {
    let (delivery, core, _host) = open_delivery(NUM_DESC);
    let registry = TaskRegistry::new();
    let task_table = EmulatedTaskTable::new();

    let pid = 201;
    task_table.add_process(pid);
    let task = registry.register(pid, TaskHandle(pid), 64);
    core.set_current(pid);
    core.write_registers(task.handle(), &TaskRegisters::default()).expect("seed registers");
    task.state().last_syscall = SyscallOutcome::NoRestart;

    let group = GroupCoordinator::new(&registry, &task_table);
    delivery.deliver_pending(&task, &group).expect("delivery should succeed");

    let after = core.read_registers(task.handle()).expect("registers after dispatch");
    assert_eq!(after.gpr[0] as i64, -4, "EINTR surfaces in the return-value register");
}

#[test]
fn core_dump_session_creates_output_file_and_quiesces_the_group() {
    let registry = TaskRegistry::new();
    let task_table = EmulatedTaskTable::new();
    let core = EmulatedCoreControl::new();
    let host = EmulatedHostNotify::new();

    let pid = 300;
    task_table.add_process(pid);
    let task = registry.register(pid, TaskHandle(pid), 64);
    core.set_current(pid);
    core.write_registers(task.handle(), &TaskRegisters::default()).expect("seed registers");

    let dir = tempfile::tempdir().expect("tempdir");
    // RLIMIT_CORE must be non-zero or CoreDumpSession::run skips the dump
    // entirely and goes straight to termination.
    rlimit::setrlimit(rlimit::Resource::CORE, 1 << 20, 1 << 20).expect("raise RLIMIT_CORE for the test");

    let session = CoreDumpSession::new("/bin/true", "core.%p", dir.path());
    let group = GroupCoordinator::new(&registry, &task_table);

    // `/bin/true` stands in for the real privilege-dropped helper: it execs
    // successfully and opens the core file on fd 1, but (unlike the real
    // helper) never writes a completion byte back, so the handshake itself
    // is expected to fail. What this test actually exercises is that the
    // fork/dup2/privilege-drop path runs end to end and that the core file
    // is created at the path `resolve_core_path` computes before any of
    // that happens.
    let result = session.run(&task, &group, &core, &host, "test_task", SIGSEGV as i32);
    assert!(result.is_err(), "the stub helper never acks, so the handshake should report that");

    let expected_path = dir.path().join(format!("core.{pid}.ve"));
    assert!(expected_path.exists(), "the core file must be created regardless of what the helper writes to it");

    assert!(host.killed().iter().any(|&(p, _)| p == pid), "the task must still be terminated after the dump attempt");
}
