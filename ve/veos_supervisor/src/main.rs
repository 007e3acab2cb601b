// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The supervisor binary: wires the DMA engine manager and the signal
//! delivery core together against the real accelerator, and runs a small
//! polling/dispatch loop over registered tasks. The per-core scheduler
//! itself lives outside this binary.

mod hal;

use anyhow::Context;
use clap::Parser;
use dma_engine::Engine;
use hal::{DriverCoreControl, DriverTranslate, KillHostNotify, MmapRegisterIo, ProcTaskTable, UnixCommandTransport};
use signal_core::{CoreDumpSession, GroupCoordinator, SigDelivery, TaskRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Largest number of hardware descriptor slots a single `Engine` opens by
/// default, mirroring `dma_engine::DEFAULT_NUM_DESC`.
const DEFAULT_NUM_DESC: usize = dma_engine::DEFAULT_NUM_DESC;

/// Size, in bytes, of the register window `MmapRegisterIo` maps out of the
/// ring's sysfs resource file.
const REGISTER_WINDOW_LEN: usize = 4096;

#[derive(Parser, Debug)]
#[clap(name = "veos_supervisor", about = "Signal and DMA services for accelerator-resident tasks")]
struct Args {
    /// Number of hardware descriptor slots to open the ring with.
    #[arg(long, default_value_t = DEFAULT_NUM_DESC)]
    num_desc: usize,

    /// Path to the core-dump helper binary, exec'd with privileges already
    /// dropped to the dumped task's uid/gid.
    #[arg(long, env = "HELPER_PATH", value_name = "PATH")]
    core_helper: PathBuf,

    /// `core_pattern`-style template used to name core dump files.
    #[arg(long, env = "CORE_FILE", value_name = "PATTERN")]
    core_pattern: String,

    /// Root directory of the accelerator device's sysfs attribute files
    /// (register window, command socket).
    #[arg(long, env = "VE_SYSFS_PATH", value_name = "PATH")]
    sysfs_root: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if std::env::var(EnvFilter::DEFAULT_ENV).is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::default().add_directive(LevelFilter::INFO.into())
    };
    tracing_subscriber::fmt()
        .log_internal_errors(true)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let regs: Arc<dyn ve_hal::RegisterIo> = Arc::new(
        MmapRegisterIo::open(args.sysfs_root.join("resource0"), REGISTER_WINDOW_LEN).context("mapping register window")?,
    );
    let transport: Arc<dyn ve_hal::CommandTransport> =
        Arc::new(UnixCommandTransport::connect(args.sysfs_root.join("command")).context("connecting to supervisor daemon socket")?);
    let translate: Arc<dyn ve_hal::Translate> = Arc::new(DriverTranslate::new(transport.clone()));
    let core: Arc<dyn ve_hal::CoreControl> = Arc::new(DriverCoreControl::new(transport));
    let task_table = ProcTaskTable::new();
    let host: Arc<dyn ve_hal::HostNotify> = Arc::new(KillHostNotify);

    let dma = Engine::open(regs, translate.clone(), args.num_desc);
    let registry = TaskRegistry::new();
    let delivery = SigDelivery::new(translate, core.clone(), dma, host.clone());
    let bin_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."));
    let coredump = CoreDumpSession::new(args.core_helper, args.core_pattern, bin_dir);

    info!(num_desc = args.num_desc, "veos_supervisor started");

    dispatch_loop(&registry, &task_table, &delivery, &coredump, core.as_ref(), host.as_ref());
    Ok(())
}

/// Polls every registered task for pending signal work. Stands in for the
/// real per-core scheduler, which decides when a task's core is safe to
/// interrupt and drives this same dispatch per-core instead of in one
/// process-wide loop.
fn dispatch_loop(
    registry: &TaskRegistry,
    task_table: &ProcTaskTable,
    delivery: &SigDelivery,
    coredump: &CoreDumpSession,
    core: &dyn ve_hal::CoreControl,
    host: &dyn ve_hal::HostNotify,
) {
    loop {
        let group = GroupCoordinator::new(registry, task_table);
        for pid in registry.pids() {
            let Some(task) = registry.get(pid) else { continue };
            match delivery.deliver_pending(&task, &group) {
                Ok(signal_core::DeliveryOutcome::Terminating) if task.state().ongoing_action == signal_core::task::OngoingAction::CoreDump => {
                    let exe_name = std::env::current_exe()
                        .ok()
                        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                        .unwrap_or_else(|| "veos_task".to_string());
                    let signum = task.state().coredump_signal as i32;
                    if let Err(err) = coredump.run(&task, &group, core, host, &exe_name, signum) {
                        tracing::warn!(pid, %err, "core dump failed");
                    }
                    registry.remove(pid);
                }
                Ok(signal_core::DeliveryOutcome::Terminating) => registry.remove(pid),
                Ok(_) => {}
                Err(err) => tracing::warn!(pid, %err, "signal delivery failed"),
            }
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}
