//! The dependency-tracking engine.
//!
//! [`DependencyTracker`] owns the state of every traced process and the graph being built. The
//! tracing session feeds it syscall entries and exits one at a time; it never touches ptrace
//! itself, so it can be driven by synthetic events.

use std::path::{Path, PathBuf};

use log::{debug, info, trace, warn};
use nix::unistd::Pid;

use crate::error::{PathResolutionError, TraceError};
use crate::graph::DependencyGraph;
use crate::handlers::{self, EdgeSink, HandlerContext};
use crate::platforms::PlatformHandler;
use crate::process_state::files::FdEntry;
use crate::process_state::{PendingSyscall, ProcessState, ProcessTable};
use crate::resolver::{FileSystem, MemoryReader, Resolver};
use crate::syscalls::{handler_for, EntrySnapshot, SpawnEvent, Syscall, SyscallArgs, SyscallEntry};
use crate::tracer_conf::{RuntimeConf, TracerConf};

/// A recovered error, kept for the final report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub pid: Pid,
    pub syscall: i64,
    pub message: String,
}

/// What a finished (or aborted) session produced
#[derive(Debug)]
pub struct TraceReport {
    pub graph: DependencyGraph,
    pub diagnostics: Vec<Diagnostic>,
    pub interrupted: bool,
}

pub struct DependencyTracker<'a> {
    platform: &'a dyn PlatformHandler,
    memory: &'a dyn MemoryReader,
    fs: &'a dyn FileSystem,
    conf: &'a TracerConf,
    runtime_conf: &'a RuntimeConf<'a>,
    processes: ProcessTable,
    graph: DependencyGraph,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> DependencyTracker<'a> {
    pub fn new(
        platform: &'a dyn PlatformHandler,
        memory: &'a dyn MemoryReader,
        fs: &'a dyn FileSystem,
        conf: &'a TracerConf,
        runtime_conf: &'a RuntimeConf<'a>,
    ) -> Self {
        Self {
            platform,
            memory,
            fs,
            conf,
            runtime_conf,
            processes: ProcessTable::new(),
            graph: DependencyGraph::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Registers the first traced process
    pub fn add_root(&mut self, pid: Pid, cwd: PathBuf) {
        info!("Tracing root process {} in {:?}", pid, cwd);
        self.processes.insert_root(pid, cwd);
    }

    /// Registers a descriptor a process already had when tracing started
    pub fn add_inherited_fd(&mut self, pid: Pid, fd: i32, path: &Path) {
        let identity = self.fs.identity(path, true).ok();
        if let Some(process) = self.processes.get(pid) {
            trace!("Process {} inherits FD {} ({:?})", pid, fd, path);
            process.insert_fd(FdEntry::file(
                pid,
                fd,
                path.to_path_buf(),
                identity,
                nix::fcntl::OFlag::O_RDWR,
            ));
        }
        if let Some(identity) = identity {
            self.graph.name(identity, path);
        }
    }

    pub fn is_traced(&self, pid: Pid) -> bool {
        self.processes.contains(pid)
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.processes.pids()
    }

    pub fn process(&self, pid: Pid) -> Option<&ProcessState> {
        self.processes.get(pid)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    fn resolver(&self) -> Resolver<'a> {
        Resolver::new(self.memory, self.fs, self.conf.max_path_len)
    }

    fn classify(&self, number: i64) -> Syscall {
        match self.platform.classify(number) {
            Syscall::Other(n) if self.conf.ignored_syscalls.contains(&n) => Syscall::Ignored,
            syscall => syscall,
        }
    }

    /// Remembers a syscall that has just entered, capturing any filesystem state its completion
    /// would destroy
    pub fn syscall_entry(&mut self, pid: Pid, entry: SyscallEntry) {
        let resolver = self.resolver();
        let syscall = self.classify(entry.number);
        let process = match self.processes.get_mut(pid) {
            Some(p) => p,
            None => {
                warn!("Syscall entry from untraced process {}", pid);
                return;
            }
        };
        let snapshot = if entry.number < 0 {
            EntrySnapshot::None
        } else {
            handlers::snapshot(syscall, &resolver, process, &entry)
        };
        process.pending = Some(PendingSyscall { entry, snapshot });
    }

    /// Completes the syscall `pid` entered. Returns `Ok(None)` if nothing is pending, which is the
    /// case once a spawn has already been completed from its ptrace event.
    pub fn syscall_exit(&mut self, pid: Pid, ret: i64) -> Result<Option<SpawnEvent>, TraceError> {
        let number = match self.processes.get(pid).and_then(|p| p.pending.as_ref()) {
            Some(pending) => pending.entry.number,
            None => return Ok(None),
        };
        if number >= 0 && handler_for(self.classify(number)).is_none() {
            return Err(TraceError::UnhandledSyscall { number, pid });
        }
        let pending = match self.processes.get_mut(pid).and_then(|p| p.pending.take()) {
            Some(pending) => pending,
            None => return Ok(None),
        };
        self.handle(SyscallArgs::completed(pid, pending.entry, ret), pending.snapshot)
    }

    /// Completes a pending spawn syscall early, from the parent's fork/vfork/clone event. This
    /// registers the child before the parent returns, which a vfork parent only does once the child
    /// has exec'd or exited.
    pub fn complete_spawn(&mut self, pid: Pid, child: Pid) -> Result<Option<SpawnEvent>, TraceError> {
        let is_spawn = self
            .processes
            .get(pid)
            .and_then(|p| p.pending.as_ref())
            .map(|pending| self.classify(pending.entry.number).is_spawn())
            .unwrap_or(false);
        if !is_spawn {
            warn!("Process {} reported child {} outside a spawn syscall", pid, child);
            return Ok(None);
        }
        self.syscall_exit(pid, i64::from(child.as_raw()))
    }

    /// Handles one completed syscall with no entry snapshot
    pub fn dispatch(&mut self, args: SyscallArgs) -> Result<Option<SpawnEvent>, TraceError> {
        self.handle(args, EntrySnapshot::None)
    }

    fn handle(&mut self, args: SyscallArgs, snapshot: EntrySnapshot) -> Result<Option<SpawnEvent>, TraceError> {
        // Negative numbers are trace events that are not syscalls
        if args.number < 0 {
            return Ok(None);
        }
        let syscall = self.classify(args.number);
        let handler = handler_for(syscall).ok_or(TraceError::UnhandledSyscall {
            number: args.number,
            pid: args.pid,
        })?;
        trace!("Process {}: {:?} {:X?} = {}", args.pid, syscall, args.args, args.ret);

        let resolver = self.resolver();
        let process = match self.processes.get_mut(args.pid) {
            Some(p) => p,
            None => {
                warn!("Syscall {:?} from untraced process {}", syscall, args.pid);
                return Ok(None);
            }
        };
        let sink = EdgeSink::new(&mut self.graph, self.runtime_conf.edge_cb.as_deref());
        let mut ctx = HandlerContext::new(process, &resolver, sink, snapshot);

        match handler(&mut ctx, &args) {
            Ok(Some(spawn)) => {
                self.spawn(spawn);
                Ok(Some(spawn))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.diagnose(&args, syscall, e);
                Ok(None)
            }
        }
    }

    fn diagnose(&mut self, args: &SyscallArgs, syscall: Syscall, err: PathResolutionError) {
        debug!("Process {}: skipping {:?}: {}", args.pid, syscall, err);
        self.diagnostics.push(Diagnostic {
            pid: args.pid,
            syscall: args.number,
            message: err.to_string(),
        });
    }

    fn spawn(&mut self, spawn: SpawnEvent) {
        if self.processes.on_spawn(spawn.parent, spawn.child, spawn.sharing) {
            debug!(
                "Process {} spawned {} ({:?} descriptors)",
                spawn.parent, spawn.child, spawn.sharing
            );
            self.graph
                .record_spawn(spawn.parent.as_raw(), spawn.child.as_raw());
        } else {
            debug!("Spawn of {} by {} already registered", spawn.child, spawn.parent);
        }
    }

    /// Forgets a process that has exited. Repeated calls are no-ops.
    pub fn process_exit(&mut self, pid: Pid) {
        if self.processes.on_exit(pid).is_some() {
            info!("Process {} exited", pid);
        }
    }

    /// Discards all process state. Edges already recorded are kept.
    pub fn abort(&mut self) {
        self.processes.clear();
    }

    pub fn into_report(self, interrupted: bool) -> TraceReport {
        TraceReport {
            graph: self.graph,
            diagnostics: self.diagnostics,
            interrupted,
        }
    }
}
