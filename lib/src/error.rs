use std::io;
use std::path::PathBuf;

use nix::unistd::Pid;
use thiserror::Error;

/// Errors that end a tracing session
#[derive(Debug, Error)]
pub enum TraceError {
    /// A syscall that is neither handled nor explicitly ignored. Silently skipping it could miss a
    /// real dependency, so the session is aborted.
    #[error("unhandled syscall {number} issued by process {pid}")]
    UnhandledSyscall { number: i64, pid: Pid },

    #[error("tracing error for process {pid}: {source}")]
    Tracing {
        pid: Pid,
        #[source]
        source: nix::Error,
    },

    #[error("unable to start tracee: {0}")]
    Spawn(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A path argument that could not be turned into a file identity. These are recovered from: the
/// edge is skipped and a diagnostic is kept.
#[derive(Debug, Error)]
pub enum PathResolutionError {
    #[error("unable to read memory of process {pid} at 0x{addr:X}")]
    Memory { pid: Pid, addr: usize },

    #[error("string at 0x{addr:X} is not nul-terminated within {max_len} bytes")]
    NotNulTerminated { addr: usize, max_len: usize },

    #[error("descriptor {fd} is not open in process {pid}")]
    BadDirFd { pid: Pid, fd: i32 },

    #[error("unable to query {path:?}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
