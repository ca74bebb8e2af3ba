use nix::fcntl::{FdFlag, OFlag};

use super::HandlerContext;
use crate::process_state::files::FdEntry;
use crate::syscalls::{HandlerResult, SyscallArgs};

const CLOSE_RANGE_UNSHARE: u64 = 1 << 1;
const CLOSE_RANGE_CLOEXEC: u64 = 1 << 2;

pub fn sys_close(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    if !args.failed() {
        ctx.process.close_fd(args.int_arg(0));
    }
    Ok(None)
}

pub fn sys_close_range(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    if args.failed() {
        return Ok(None);
    }
    let clamp = |v: u64| v.min(i32::MAX as u64) as i32;
    let flags = args.arg(2);
    if flags & CLOSE_RANGE_UNSHARE != 0 {
        ctx.process.unshare_descriptors();
    }
    ctx.process.close_range(
        clamp(args.arg(0) & u64::from(u32::MAX)),
        clamp(args.arg(1) & u64::from(u32::MAX)),
        flags & CLOSE_RANGE_CLOEXEC != 0,
    );
    Ok(None)
}

pub fn sys_pipe(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    pipe(ctx, args, OFlag::empty())
}

pub fn sys_pipe2(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    pipe(ctx, args, OFlag::from_bits_truncate(args.int_arg(1)))
}

/// The two new descriptors are written by the kernel to an `int[2]` in the tracee
fn pipe(ctx: &mut HandlerContext<'_>, args: &SyscallArgs, flags: OFlag) -> HandlerResult {
    if args.failed() {
        return Ok(None);
    }
    let pid = ctx.process.pid;
    let buf = ctx.resolver.read_bytes(pid, args.arg(0), 8)?;
    let read_end = i32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let write_end = i32::from_ne_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let cloexec = flags & OFlag::O_CLOEXEC;
    ctx.process
        .insert_fd(FdEntry::pipe(pid, read_end, OFlag::O_RDONLY | cloexec));
    ctx.process
        .insert_fd(FdEntry::pipe(pid, write_end, OFlag::O_WRONLY | cloexec));
    Ok(None)
}

pub fn sys_dup(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    if !args.failed() {
        ctx.process.dup_fd(args.int_arg(0), args.ret_fd(), false);
    }
    Ok(None)
}

pub fn sys_dup2(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    let (old_fd, new_fd) = (args.int_arg(0), args.int_arg(1));

    // dup2 onto itself leaves the descriptor and its flags untouched
    if !args.failed() && old_fd != new_fd {
        ctx.process.dup_fd(old_fd, new_fd, false);
    }
    Ok(None)
}

pub fn sys_dup3(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    if !args.failed() {
        let cloexec = OFlag::from_bits_truncate(args.int_arg(2)).contains(OFlag::O_CLOEXEC);
        ctx.process.dup_fd(args.int_arg(0), args.int_arg(1), cloexec);
    }
    Ok(None)
}

pub fn sys_fcntl(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    if args.failed() {
        return Ok(None);
    }
    let fd = args.int_arg(0);
    match args.int_arg(1) {
        libc::F_DUPFD => ctx.process.dup_fd(fd, args.ret_fd(), false),
        libc::F_DUPFD_CLOEXEC => ctx.process.dup_fd(fd, args.ret_fd(), true),
        libc::F_SETFD => {
            let flags = FdFlag::from_bits_truncate(args.int_arg(2));
            ctx.process.set_cloexec(fd, flags.contains(FdFlag::FD_CLOEXEC));
        }
        _ => {}
    }
    Ok(None)
}
