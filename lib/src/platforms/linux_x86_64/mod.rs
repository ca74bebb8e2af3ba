use crate::platforms::{PlatformHandler, SyscallRegs};
use crate::syscalls::{Syscall, SyscallEntry};

pub struct Handler;

impl Handler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Handler {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformHandler for Handler {
    fn entry(&self, regs: &SyscallRegs) -> SyscallEntry {
        SyscallEntry {
            number: regs.orig_rax as i64,
            args: [regs.rdi, regs.rsi, regs.rdx, regs.r10, regs.r8, regs.r9],
        }
    }

    fn return_value(&self, regs: &SyscallRegs) -> i64 {
        regs.rax as i64
    }

    fn classify(&self, number: i64) -> Syscall {
        match number {
            libc::SYS_read => Syscall::Read,
            libc::SYS_pread64 => Syscall::Pread64,
            libc::SYS_readv => Syscall::Readv,
            libc::SYS_preadv => Syscall::Preadv,
            libc::SYS_preadv2 => Syscall::Preadv2,
            libc::SYS_write => Syscall::Write,
            libc::SYS_pwrite64 => Syscall::Pwrite64,
            libc::SYS_writev => Syscall::Writev,
            libc::SYS_pwritev => Syscall::Pwritev,
            libc::SYS_pwritev2 => Syscall::Pwritev2,
            libc::SYS_sendfile => Syscall::Sendfile,
            libc::SYS_copy_file_range => Syscall::CopyFileRange,
            libc::SYS_open => Syscall::Open,
            libc::SYS_openat => Syscall::Openat,
            libc::SYS_openat2 => Syscall::Openat2,
            libc::SYS_creat => Syscall::Creat,
            libc::SYS_close => Syscall::Close,
            libc::SYS_close_range => Syscall::CloseRange,
            libc::SYS_stat => Syscall::Stat,
            libc::SYS_lstat => Syscall::Lstat,
            libc::SYS_fstat => Syscall::Fstat,
            libc::SYS_newfstatat => Syscall::Newfstatat,
            libc::SYS_statx => Syscall::Statx,
            libc::SYS_access => Syscall::Access,
            libc::SYS_faccessat => Syscall::Faccessat,
            libc::SYS_faccessat2 => Syscall::Faccessat2,
            libc::SYS_readlink => Syscall::Readlink,
            libc::SYS_readlinkat => Syscall::Readlinkat,
            libc::SYS_getdents => Syscall::Getdents,
            libc::SYS_getdents64 => Syscall::Getdents64,
            libc::SYS_pipe => Syscall::Pipe,
            libc::SYS_pipe2 => Syscall::Pipe2,
            libc::SYS_dup => Syscall::Dup,
            libc::SYS_dup2 => Syscall::Dup2,
            libc::SYS_dup3 => Syscall::Dup3,
            libc::SYS_fcntl => Syscall::Fcntl,
            libc::SYS_clone => Syscall::Clone,
            libc::SYS_clone3 => Syscall::Clone3,
            libc::SYS_fork => Syscall::Fork,
            libc::SYS_vfork => Syscall::Vfork,
            libc::SYS_execve => Syscall::Execve,
            libc::SYS_execveat => Syscall::Execveat,
            libc::SYS_chdir => Syscall::Chdir,
            libc::SYS_fchdir => Syscall::Fchdir,
            libc::SYS_rename => Syscall::Rename,
            libc::SYS_renameat => Syscall::Renameat,
            libc::SYS_renameat2 => Syscall::Renameat2,
            libc::SYS_unlink => Syscall::Unlink,
            libc::SYS_unlinkat => Syscall::Unlinkat,
            libc::SYS_rmdir => Syscall::Rmdir,
            libc::SYS_mkdir => Syscall::Mkdir,
            libc::SYS_mkdirat => Syscall::Mkdirat,
            libc::SYS_symlink => Syscall::Symlink,
            libc::SYS_symlinkat => Syscall::Symlinkat,
            libc::SYS_link => Syscall::Link,
            libc::SYS_linkat => Syscall::Linkat,
            libc::SYS_chmod => Syscall::Chmod,
            libc::SYS_fchmod => Syscall::Fchmod,
            libc::SYS_fchmodat => Syscall::Fchmodat,
            libc::SYS_truncate => Syscall::Truncate,
            libc::SYS_ftruncate => Syscall::Ftruncate,
            libc::SYS_fallocate => Syscall::Fallocate,
            libc::SYS_chown => Syscall::Chown,
            libc::SYS_fchown => Syscall::Fchown,
            libc::SYS_lchown => Syscall::Lchown,
            libc::SYS_fchownat => Syscall::Fchownat,
            libc::SYS_utime => Syscall::Utime,
            libc::SYS_utimes => Syscall::Utimes,
            libc::SYS_futimesat => Syscall::Futimesat,
            libc::SYS_utimensat => Syscall::Utimensat,
            libc::SYS_setxattr => Syscall::Setxattr,
            libc::SYS_lsetxattr => Syscall::Lsetxattr,
            libc::SYS_fsetxattr => Syscall::Fsetxattr,
            libc::SYS_removexattr => Syscall::Removexattr,
            libc::SYS_lremovexattr => Syscall::Lremovexattr,
            libc::SYS_fremovexattr => Syscall::Fremovexattr,
            libc::SYS_getxattr => Syscall::Getxattr,
            libc::SYS_lgetxattr => Syscall::Lgetxattr,
            libc::SYS_fgetxattr => Syscall::Fgetxattr,
            libc::SYS_listxattr => Syscall::Listxattr,
            libc::SYS_llistxattr => Syscall::Llistxattr,
            libc::SYS_flistxattr => Syscall::Flistxattr,
            libc::SYS_mknod => Syscall::Mknod,
            libc::SYS_mknodat => Syscall::Mknodat,

            // Memory management
            libc::SYS_mmap
            | libc::SYS_mprotect
            | libc::SYS_munmap
            | libc::SYS_mremap
            | libc::SYS_madvise
            | libc::SYS_brk
            | libc::SYS_membarrier

            // Signals
            | libc::SYS_rt_sigaction
            | libc::SYS_rt_sigprocmask
            | libc::SYS_rt_sigreturn
            | libc::SYS_rt_sigsuspend
            | libc::SYS_rt_sigtimedwait
            | libc::SYS_sigaltstack
            | libc::SYS_kill
            | libc::SYS_tkill
            | libc::SYS_tgkill
            | libc::SYS_pause
            | libc::SYS_alarm
            | libc::SYS_setitimer
            | libc::SYS_getitimer

            // Scheduling, waiting and time
            | libc::SYS_futex
            | libc::SYS_sched_yield
            | libc::SYS_sched_getaffinity
            | libc::SYS_sched_setaffinity
            | libc::SYS_nanosleep
            | libc::SYS_clock_nanosleep
            | libc::SYS_clock_gettime
            | libc::SYS_clock_getres
            | libc::SYS_gettimeofday
            | libc::SYS_time
            | libc::SYS_wait4
            | libc::SYS_waitid
            | libc::SYS_poll
            | libc::SYS_ppoll
            | libc::SYS_select
            | libc::SYS_pselect6
            | libc::SYS_epoll_create1
            | libc::SYS_epoll_ctl
            | libc::SYS_epoll_wait
            | libc::SYS_epoll_pwait

            // Resource limits and usage
            | libc::SYS_getrlimit
            | libc::SYS_setrlimit
            | libc::SYS_prlimit64
            | libc::SYS_getrusage
            | libc::SYS_sysinfo
            | libc::SYS_umask

            // Process identity and lifetime
            | libc::SYS_getpid
            | libc::SYS_getppid
            | libc::SYS_gettid
            | libc::SYS_getuid
            | libc::SYS_geteuid
            | libc::SYS_getgid
            | libc::SYS_getegid
            | libc::SYS_getgroups
            | libc::SYS_getpgrp
            | libc::SYS_getpgid
            | libc::SYS_setpgid
            | libc::SYS_getsid
            | libc::SYS_setsid
            | libc::SYS_capget
            | libc::SYS_prctl
            | libc::SYS_arch_prctl
            | libc::SYS_set_tid_address
            | libc::SYS_set_robust_list
            | libc::SYS_get_robust_list
            | libc::SYS_rseq
            | libc::SYS_exit
            | libc::SYS_exit_group
            | libc::SYS_uname
            | libc::SYS_getrandom

            // Descriptor calls without a file dependency
            | libc::SYS_lseek
            | libc::SYS_ioctl
            | libc::SYS_getcwd
            | libc::SYS_fsync
            | libc::SYS_fdatasync
            | libc::SYS_fadvise64
            | libc::SYS_flock
            | libc::SYS_statfs
            | libc::SYS_fstatfs

            // Sockets
            | libc::SYS_socket
            | libc::SYS_socketpair
            | libc::SYS_connect
            | libc::SYS_bind
            | libc::SYS_listen
            | libc::SYS_accept
            | libc::SYS_accept4
            | libc::SYS_shutdown
            | libc::SYS_sendto
            | libc::SYS_recvfrom
            | libc::SYS_sendmsg
            | libc::SYS_recvmsg
            | libc::SYS_getsockname
            | libc::SYS_getpeername
            | libc::SYS_setsockopt
            | libc::SYS_getsockopt => Syscall::Ignored,

            n => Syscall::Other(n),
        }
    }
}
