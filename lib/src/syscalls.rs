use nix::errno::Errno;
use nix::unistd::Pid;

use crate::error::PathResolutionError;
use crate::handlers::{self, HandlerContext};
use crate::process_state::FdSharing;
use crate::resolver::Resolved;

/// Largest magnitude of a negative return value that encodes an errno
const MAX_ERRNO: i64 = 4095;

/// Raw arguments of a syscall as seen at its entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallEntry {
    pub number: i64,
    pub args: [u64; 6],
}

/// One completed syscall invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallArgs {
    pub pid: Pid,
    pub number: i64,
    pub args: [u64; 6],
    pub ret: i64,
}

impl SyscallArgs {
    pub fn new(pid: Pid, number: i64, args: [u64; 6], ret: i64) -> Self {
        Self {
            pid,
            number,
            args,
            ret,
        }
    }

    pub fn completed(pid: Pid, entry: SyscallEntry, ret: i64) -> Self {
        Self::new(pid, entry.number, entry.args, ret)
    }

    pub fn arg(&self, idx: usize) -> u64 {
        self.args[idx]
    }

    /// Argument `idx` as a descriptor or other C `int`
    pub fn int_arg(&self, idx: usize) -> i32 {
        self.args[idx] as i32
    }

    pub fn failed(&self) -> bool {
        self.ret < 0 && self.ret >= -MAX_ERRNO
    }

    pub fn errno(&self) -> Option<Errno> {
        if self.failed() {
            Some(Errno::from_raw(-self.ret as i32))
        } else {
            None
        }
    }

    /// Return value as a descriptor
    pub fn ret_fd(&self) -> i32 {
        self.ret as i32
    }
}

/// Syscalls the engine recognises. Numbers are mapped to these by the platform handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Syscall {
    Read,
    Pread64,
    Readv,
    Preadv,
    Preadv2,
    Write,
    Pwrite64,
    Writev,
    Pwritev,
    Pwritev2,
    Sendfile,
    CopyFileRange,
    Open,
    Openat,
    Openat2,
    Creat,
    Close,
    CloseRange,
    Stat,
    Lstat,
    Fstat,
    Newfstatat,
    Statx,
    Access,
    Faccessat,
    Faccessat2,
    Readlink,
    Readlinkat,
    Getdents,
    Getdents64,
    Pipe,
    Pipe2,
    Dup,
    Dup2,
    Dup3,
    Fcntl,
    Clone,
    Clone3,
    Fork,
    Vfork,
    Execve,
    Execveat,
    Chdir,
    Fchdir,
    Rename,
    Renameat,
    Renameat2,
    Unlink,
    Unlinkat,
    Rmdir,
    Mkdir,
    Mkdirat,
    Symlink,
    Symlinkat,
    Link,
    Linkat,
    Chmod,
    Fchmod,
    Fchmodat,
    Truncate,
    Ftruncate,
    Fallocate,
    Chown,
    Fchown,
    Lchown,
    Fchownat,
    Utime,
    Utimes,
    Futimesat,
    Utimensat,
    Setxattr,
    Lsetxattr,
    Fsetxattr,
    Removexattr,
    Lremovexattr,
    Fremovexattr,
    Getxattr,
    Lgetxattr,
    Fgetxattr,
    Listxattr,
    Llistxattr,
    Flistxattr,
    Mknod,
    Mknodat,
    /// Recognised, with no effect on dependencies
    Ignored,
    /// Not recognised at all
    Other(i64),
}

impl Syscall {
    pub fn is_spawn(self) -> bool {
        matches!(self, Syscall::Clone | Syscall::Clone3 | Syscall::Fork | Syscall::Vfork)
    }
}

/// A process created by a completed syscall, to be registered by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnEvent {
    pub parent: Pid,
    pub child: Pid,
    pub sharing: FdSharing,
}

/// Filesystem state captured when a syscall entered, for syscalls whose effect destroys the
/// information needed to describe them (the file an `unlink` removed, whether an `O_CREAT` open
/// created its file, ...)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EntrySnapshot {
    #[default]
    None,
    Existed(bool),
    Victim(Resolved),
    RenameSource(Resolved),
}

pub type HandlerResult = Result<Option<SpawnEvent>, PathResolutionError>;

pub type HandlerFn = fn(&mut HandlerContext<'_>, &SyscallArgs) -> HandlerResult;

/// Maps a recognised syscall to its handler. `Other` has no handler.
pub fn handler_for(syscall: Syscall) -> Option<HandlerFn> {
    use handlers::{descriptors as d, files as f, process as p};

    let handler: HandlerFn = match syscall {
        Syscall::Read | Syscall::Pread64 | Syscall::Readv | Syscall::Preadv | Syscall::Preadv2 => {
            f::sys_read
        }
        Syscall::Write
        | Syscall::Pwrite64
        | Syscall::Writev
        | Syscall::Pwritev
        | Syscall::Pwritev2 => f::sys_write,
        Syscall::Sendfile => f::sys_sendfile,
        Syscall::CopyFileRange => f::sys_copy_file_range,
        Syscall::Open => f::sys_open,
        Syscall::Openat => f::sys_openat,
        Syscall::Openat2 => f::sys_openat2,
        Syscall::Creat => f::sys_creat,
        Syscall::Stat
        | Syscall::Access
        | Syscall::Readlink
        | Syscall::Getxattr
        | Syscall::Listxattr => f::sys_stat,
        Syscall::Lstat | Syscall::Lgetxattr | Syscall::Llistxattr => f::sys_lstat,
        Syscall::Fstat
        | Syscall::Getdents
        | Syscall::Getdents64
        | Syscall::Fgetxattr
        | Syscall::Flistxattr => f::sys_fstat,
        Syscall::Newfstatat => f::sys_newfstatat,
        Syscall::Statx => f::sys_statx,
        Syscall::Faccessat | Syscall::Readlinkat => f::sys_faccessat,
        Syscall::Faccessat2 => f::sys_faccessat2,
        Syscall::Rename => f::sys_rename,
        Syscall::Renameat | Syscall::Renameat2 => f::sys_renameat,
        Syscall::Unlink | Syscall::Rmdir => f::sys_unlink,
        Syscall::Unlinkat => f::sys_unlinkat,
        Syscall::Mkdir | Syscall::Mknod => f::sys_mkdir,
        Syscall::Mkdirat | Syscall::Mknodat => f::sys_mkdirat,
        Syscall::Symlink => f::sys_symlink,
        Syscall::Symlinkat => f::sys_symlinkat,
        Syscall::Link => f::sys_link,
        Syscall::Linkat => f::sys_linkat,
        Syscall::Chmod
        | Syscall::Truncate
        | Syscall::Chown
        | Syscall::Utime
        | Syscall::Utimes
        | Syscall::Setxattr
        | Syscall::Removexattr => f::sys_chmod,
        Syscall::Lchown | Syscall::Lsetxattr | Syscall::Lremovexattr => f::sys_lchown,
        Syscall::Fchmod
        | Syscall::Ftruncate
        | Syscall::Fchown
        | Syscall::Fallocate
        | Syscall::Fsetxattr
        | Syscall::Fremovexattr => f::sys_fchmod,
        Syscall::Fchmodat => f::sys_fchmodat,
        Syscall::Fchownat => f::sys_fchownat,
        Syscall::Utimensat => f::sys_utimensat,
        Syscall::Futimesat => f::sys_futimesat,
        Syscall::Close => d::sys_close,
        Syscall::CloseRange => d::sys_close_range,
        Syscall::Pipe => d::sys_pipe,
        Syscall::Pipe2 => d::sys_pipe2,
        Syscall::Dup => d::sys_dup,
        Syscall::Dup2 => d::sys_dup2,
        Syscall::Dup3 => d::sys_dup3,
        Syscall::Fcntl => d::sys_fcntl,
        Syscall::Clone => p::sys_clone,
        Syscall::Clone3 => p::sys_clone3,
        Syscall::Fork | Syscall::Vfork => p::sys_fork,
        Syscall::Execve | Syscall::Execveat => p::sys_execve,
        Syscall::Chdir => p::sys_chdir,
        Syscall::Fchdir => p::sys_fchdir,
        Syscall::Ignored => sys_ignore,
        Syscall::Other(_) => return None,
    };
    Some(handler)
}

fn sys_ignore(_ctx: &mut HandlerContext<'_>, _args: &SyscallArgs) -> HandlerResult {
    Ok(None)
}
