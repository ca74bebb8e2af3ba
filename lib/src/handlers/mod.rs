//! Per-syscall handlers.
//!
//! A handler runs once for a completed syscall. It receives only the state it needs: the calling
//! process, the path resolver and an edge sink. Spawns are returned to the caller instead of being
//! applied here since they touch the table of all processes.

pub mod descriptors;
pub mod files;
pub mod process;

use std::path::{Path, PathBuf};

use log::{debug, trace};
use nix::fcntl::OFlag;

use crate::error::PathResolutionError;
use crate::graph::{AccessKind, DependencyEdge, DependencyGraph};
use crate::process_state::files::FdKind;
use crate::process_state::ProcessState;
use crate::resolver::{Resolved, Resolver};
use crate::syscalls::{EntrySnapshot, Syscall, SyscallEntry};

/// Records edges into the graph and reports each new one
pub struct EdgeSink<'a> {
    graph: &'a mut DependencyGraph,
    edge_cb: Option<&'a dyn Fn(&DependencyEdge)>,
}

impl<'a> EdgeSink<'a> {
    pub fn new(graph: &'a mut DependencyGraph, edge_cb: Option<&'a dyn Fn(&DependencyEdge)>) -> Self {
        Self { graph, edge_cb }
    }

    fn notify(&self, edge: Option<DependencyEdge>, path: &Path) {
        if let Some(edge) = edge {
            debug!("Process {} {} {:?}", edge.pid, edge.kind, path);
            if let Some(cb) = self.edge_cb {
                cb(&edge);
            }
        }
    }

    pub fn record(&mut self, pid: i32, file: &Resolved, kind: AccessKind) {
        let edge = self.graph.record(pid, file, kind);
        self.notify(edge, &file.path);
    }

    pub fn record_rename(&mut self, pid: i32, from: &Resolved, to: &Resolved) {
        let (a, b) = self.graph.record_rename(pid, from, to);
        self.notify(a, &from.path);
        self.notify(b, &to.path);
    }
}

pub struct HandlerContext<'a> {
    pub process: &'a mut ProcessState,
    pub resolver: &'a Resolver<'a>,
    pub sink: EdgeSink<'a>,
    pub snapshot: EntrySnapshot,
}

impl<'a> HandlerContext<'a> {
    pub fn new(
        process: &'a mut ProcessState,
        resolver: &'a Resolver<'a>,
        sink: EdgeSink<'a>,
        snapshot: EntrySnapshot,
    ) -> Self {
        Self {
            process,
            resolver,
            sink,
            snapshot,
        }
    }

    fn pid(&self) -> i32 {
        self.process.pid.as_raw()
    }

    pub fn locate(&self, addr: u64, dirfd: Option<i32>) -> Result<PathBuf, PathResolutionError> {
        self.resolver.locate(&*self.process, addr, dirfd)
    }

    pub fn resolve(&self, addr: u64, dirfd: Option<i32>, follow: bool) -> Result<Resolved, PathResolutionError> {
        self.resolver.resolve(&*self.process, addr, dirfd, follow)
    }

    pub fn emit(&mut self, file: &Resolved, kind: AccessKind) {
        let pid = self.pid();
        self.sink.record(pid, file, kind);
    }

    /// Emits an edge for the file behind `fd`. Pipes and untracked descriptors produce nothing.
    pub fn emit_fd(&mut self, fd: i32, kind: AccessKind) {
        let entry = match self.process.fd(fd) {
            Some(entry) => entry,
            None => {
                trace!("Process {}: no tracked file for FD {}", self.process.pid, fd);
                return;
            }
        };
        if let FdKind::File {
            path,
            identity: Some(identity),
        } = entry.kind
        {
            self.emit(&Resolved { path, identity }, kind);
        }
    }

    pub fn emit_rename(&mut self, from: &Resolved, to: &Resolved) {
        let pid = self.pid();
        self.sink.record_rename(pid, from, to);
    }

    pub fn take_snapshot(&mut self) -> EntrySnapshot {
        std::mem::take(&mut self.snapshot)
    }
}

/// Captures the filesystem state a syscall is about to destroy. Failures only lose the snapshot;
/// the exit handler reports what it cannot work out without it.
pub fn snapshot(
    syscall: Syscall,
    resolver: &Resolver<'_>,
    process: &ProcessState,
    entry: &SyscallEntry,
) -> EntrySnapshot {
    let args = &entry.args;
    let dirfd = |idx: usize| Some(args[idx] as i32);
    let res = match syscall {
        Syscall::Open => existed(resolver, process, args[0], None, OFlag::from_bits_truncate(args[1] as i32)),
        Syscall::Openat => existed(
            resolver,
            process,
            args[1],
            dirfd(0),
            OFlag::from_bits_truncate(args[2] as i32),
        ),
        Syscall::Openat2 => match resolver.read_bytes(process.pid, args[2], 8) {
            Ok(how) => {
                let flags = u64::from_ne_bytes(how_flags(&how));
                existed(resolver, process, args[1], dirfd(0), OFlag::from_bits_truncate(flags as i32))
            }
            Err(e) => Err(e),
        },
        Syscall::Creat => existed(resolver, process, args[0], None, OFlag::O_CREAT),
        Syscall::Unlink | Syscall::Rmdir => resolver
            .resolve(process, args[0], None, false)
            .map(EntrySnapshot::Victim),
        Syscall::Unlinkat => resolver
            .resolve(process, args[1], dirfd(0), false)
            .map(EntrySnapshot::Victim),
        Syscall::Rename => resolver
            .resolve(process, args[0], None, false)
            .map(EntrySnapshot::RenameSource),
        Syscall::Renameat | Syscall::Renameat2 => resolver
            .resolve(process, args[1], dirfd(0), false)
            .map(EntrySnapshot::RenameSource),
        _ => Ok(EntrySnapshot::None),
    };
    res.unwrap_or_else(|e| {
        trace!("No entry snapshot for {:?} in process {}: {}", syscall, process.pid, e);
        EntrySnapshot::None
    })
}

fn existed(
    resolver: &Resolver<'_>,
    process: &ProcessState,
    addr: u64,
    dirfd: Option<i32>,
    flags: OFlag,
) -> Result<EntrySnapshot, PathResolutionError> {
    if !flags.contains(OFlag::O_CREAT) {
        return Ok(EntrySnapshot::None);
    }
    let path = resolver.locate(process, addr, dirfd)?;
    Ok(EntrySnapshot::Existed(resolver.identity(&path, true).is_ok()))
}

pub(crate) fn how_flags(how: &[u8]) -> [u8; 8] {
    let mut flags = [0u8; 8];
    flags.copy_from_slice(&how[..8]);
    flags
}
