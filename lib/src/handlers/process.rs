use log::debug;
use nix::sched::CloneFlags;
use nix::unistd::Pid;

use super::HandlerContext;
use crate::process_state::FdSharing;
use crate::syscalls::{HandlerResult, SpawnEvent, SyscallArgs};

/// In the parent a successful clone returns the child's pid. The child's own view (0) carries no
/// new information.
fn spawned(ctx: &HandlerContext<'_>, args: &SyscallArgs, flags: CloneFlags) -> HandlerResult {
    if args.ret <= 0 {
        return Ok(None);
    }
    let sharing = if flags.contains(CloneFlags::CLONE_FILES) {
        FdSharing::Shared
    } else {
        FdSharing::Copied
    };
    Ok(Some(SpawnEvent {
        parent: ctx.process.pid,
        child: Pid::from_raw(args.ret as i32),
        sharing,
    }))
}

pub fn sys_clone(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    spawned(ctx, args, CloneFlags::from_bits_truncate(args.int_arg(0)))
}

/// clone3 passes its flags as the first field of a `struct clone_args`
pub fn sys_clone3(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    if args.ret <= 0 {
        return Ok(None);
    }
    // The child exists whatever the flags were, so an unreadable struct only costs the sharing mode
    let flags = match ctx.resolver.read_bytes(ctx.process.pid, args.arg(0), 8) {
        Ok(raw) => {
            let mut bits = [0u8; 8];
            bits.copy_from_slice(&raw);
            CloneFlags::from_bits_truncate(u64::from_ne_bytes(bits) as i32)
        }
        Err(e) => {
            debug!("Process {}: clone3 arguments unreadable, copying descriptors: {}", ctx.process.pid, e);
            CloneFlags::empty()
        }
    };
    spawned(ctx, args, flags)
}

/// fork, vfork. vfork additionally suspends the parent until the child execs or exits; that
/// only affects scheduling, so both get copy semantics.
pub fn sys_fork(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    spawned(ctx, args, CloneFlags::empty())
}

pub fn sys_execve(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    if !args.failed() {
        debug!("Process {} replaced its image", ctx.process.pid);
        ctx.process.exec();
    }
    Ok(None)
}

pub fn sys_chdir(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    if args.failed() {
        return Ok(None);
    }
    let path = ctx.locate(args.arg(0), None)?;
    ctx.process.cwd = ctx.resolver.directory(&path);
    Ok(None)
}

pub fn sys_fchdir(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    if args.failed() {
        return Ok(None);
    }
    ctx.process.cwd = ctx.resolver.dirfd_path(&*ctx.process, args.int_arg(0))?;
    Ok(None)
}
