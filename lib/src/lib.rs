pub mod child_process;
pub mod error;
pub mod graph;
pub mod handlers;
pub mod platforms;
pub mod process_state;
pub mod resolver;
pub mod syscalls;
pub mod tracer_conf;
pub mod tracker;

use std::env;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use log::{info, warn};
use nix::sys::ptrace;
use nix::unistd;

pub use crate::error::{PathResolutionError, TraceError};
pub use crate::graph::{AccessKind, DependencyEdge, DependencyGraph, SpawnEdge};
pub use crate::resolver::FileIdentity;
pub use crate::tracker::{DependencyTracker, Diagnostic, TraceReport};

use crate::child_process::TraceeMemory;
use crate::platforms::NativeHandler;
use crate::resolver::HostFileSystem;
use crate::tracer_conf::{RuntimeConf, TracerConf};

/// Runs `cmd` under ptrace, following every process it spawns, and returns the dependency graph
/// of the whole process tree.
///
/// SIGINT ends the session early: all tracees are killed and the edges recorded so far are
/// returned with `interrupted` set.
pub fn trace(cmd: Vec<&str>, conf: &TracerConf, runtime_conf: &RuntimeConf) -> Result<TraceReport, TraceError> {
    // Create a syscall PlatformHandler
    let platform_handler = NativeHandler::new();

    // Fork this process
    // SAFETY: the child only calls PTRACE_TRACEME and exec (or exits)
    let fork_res = unsafe { unistd::fork() }.map_err(|e| TraceError::Spawn(format!("unable to fork: {}", e)))?;

    match fork_res {
        unistd::ForkResult::Parent { child } => {
            info!("Tracing child process {} ({:?})", child, cmd);

            // Wait for child and set trace options
            child_process::wait_child(child)?;
            ptrace::setoptions(
                child,
                ptrace::Options::PTRACE_O_EXITKILL

                    // Trace sub-processes of tracee
                    | ptrace::Options::PTRACE_O_TRACECLONE
                    | ptrace::Options::PTRACE_O_TRACEFORK
                    | ptrace::Options::PTRACE_O_TRACEVFORK
                    | ptrace::Options::PTRACE_O_TRACEEXEC

                    // PTRACE_O_TRACESYSGOOD: recommended by strace README-linux-ptrace. Causes
                    // WaitStatus::PtraceSyscall to be generated instead of WaitStatus::Stopped
                    // upon syscall in tracee.
                    | ptrace::Options::PTRACE_O_TRACESYSGOOD,
            )
            .map_err(|source| TraceError::Tracing { pid: child, source })?;

            let interrupted = Arc::new(AtomicBool::new(false));
            let sig_id = signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&interrupted))?;

            let memory = TraceeMemory;
            let fs = HostFileSystem;
            let mut tracker = DependencyTracker::new(&platform_handler, &memory, &fs, conf, runtime_conf);

            let cwd = match child_process::process_cwd(child) {
                Ok(cwd) => cwd,
                Err(e) => {
                    warn!("Unable to read working directory of process {}: {}", child, e);
                    env::current_dir()?
                }
            };
            tracker.add_root(child, cwd);
            if let Err(e) = child_process::seed_descriptors(&mut tracker, child) {
                warn!("Unable to read inherited descriptors of process {}: {}", child, e);
            }

            // Execute main child process control loop
            let res = child_process::child_loop(child, &platform_handler, &mut tracker, &interrupted);
            signal_hook::low_level::unregister(sig_id);

            let interrupted = res?;
            let report = tracker.into_report(interrupted);
            info!(
                "Recorded {} edges and {} spawns ({} diagnostics)",
                report.graph.edges().len(),
                report.graph.spawns().len(),
                report.diagnostics.len()
            );
            Ok(report)
        }
        unistd::ForkResult::Child => {
            if let Err(e) = child_process::exec_child(cmd) {
                eprintln!("ERROR: {}", e);
            }
            std::process::exit(127);
        }
    }
}
