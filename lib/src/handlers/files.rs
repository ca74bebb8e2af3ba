use std::path::PathBuf;

use nix::fcntl::{AtFlags, OFlag};

use super::{how_flags, HandlerContext};
use crate::graph::AccessKind;
use crate::process_state::files::{opened_for_writing, FdEntry};
use crate::resolver::Resolved;
use crate::syscalls::{EntrySnapshot, HandlerResult, SyscallArgs};

// -----------------------------------------------------------------------------
// Descriptor I/O

pub fn sys_read(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    if !args.failed() {
        ctx.emit_fd(args.int_arg(0), AccessKind::Read);
    }
    Ok(None)
}

pub fn sys_write(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    if !args.failed() {
        ctx.emit_fd(args.int_arg(0), AccessKind::Write);
    }
    Ok(None)
}

pub fn sys_sendfile(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    if !args.failed() {
        ctx.emit_fd(args.int_arg(1), AccessKind::Read);
        ctx.emit_fd(args.int_arg(0), AccessKind::Write);
    }
    Ok(None)
}

pub fn sys_copy_file_range(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    if !args.failed() {
        ctx.emit_fd(args.int_arg(0), AccessKind::Read);
        ctx.emit_fd(args.int_arg(2), AccessKind::Write);
    }
    Ok(None)
}

// -----------------------------------------------------------------------------
// Opening files

pub fn sys_open(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    open(ctx, args, None, args.arg(0), OFlag::from_bits_truncate(args.int_arg(1)))
}

pub fn sys_openat(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    open(
        ctx,
        args,
        Some(args.int_arg(0)),
        args.arg(1),
        OFlag::from_bits_truncate(args.int_arg(2)),
    )
}

pub fn sys_openat2(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    if args.failed() {
        return Ok(None);
    }
    let how = ctx.resolver.read_bytes(ctx.process.pid, args.arg(2), 8)?;
    let flags = u64::from_ne_bytes(how_flags(&how)) as i32;
    open(
        ctx,
        args,
        Some(args.int_arg(0)),
        args.arg(1),
        OFlag::from_bits_truncate(flags),
    )
}

pub fn sys_creat(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    open(
        ctx,
        args,
        None,
        args.arg(0),
        OFlag::O_CREAT | OFlag::O_WRONLY | OFlag::O_TRUNC,
    )
}

/// Registers the new descriptor, then emits Create if `O_CREAT` brought the file into existence,
/// Write if it was opened for writing and Read otherwise
fn open(
    ctx: &mut HandlerContext<'_>,
    args: &SyscallArgs,
    dirfd: Option<i32>,
    path_addr: u64,
    flags: OFlag,
) -> HandlerResult {
    if args.failed() {
        return Ok(None);
    }
    let pid = ctx.process.pid;
    let fd = args.ret_fd();
    let path = ctx.locate(path_addr, dirfd)?;

    // Anonymous file, nothing to depend on
    if flags.contains(OFlag::O_TMPFILE) {
        ctx.process.insert_fd(FdEntry::file(pid, fd, path, None, flags));
        return Ok(None);
    }

    let identity = ctx.resolver.identity(&path, true);
    ctx.process.insert_fd(FdEntry::file(
        pid,
        fd,
        path.clone(),
        identity.as_ref().ok().copied(),
        flags,
    ));
    let file = Resolved {
        path,
        identity: identity?,
    };

    let created = flags.contains(OFlag::O_CREAT) && ctx.take_snapshot() == EntrySnapshot::Existed(false);
    let kind = if created {
        AccessKind::Create
    } else if opened_for_writing(flags) {
        AccessKind::Write
    } else {
        AccessKind::Read
    };
    ctx.emit(&file, kind);
    Ok(None)
}

// -----------------------------------------------------------------------------
// Metadata and directory inspection

pub fn sys_stat(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    inspect(ctx, args, None, args.arg(0), true)
}

pub fn sys_lstat(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    inspect(ctx, args, None, args.arg(0), false)
}

/// fstat, getdents: the descriptor's file is the dependency
pub fn sys_fstat(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    sys_read(ctx, args)
}

pub fn sys_newfstatat(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    access_at(ctx, args, args.int_arg(0), args.arg(1), args.int_arg(3), AccessKind::Read)
}

pub fn sys_statx(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    access_at(ctx, args, args.int_arg(0), args.arg(1), args.int_arg(2), AccessKind::Read)
}

/// faccessat and readlinkat carry no flags argument
pub fn sys_faccessat(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    access_at(ctx, args, args.int_arg(0), args.arg(1), 0, AccessKind::Read)
}

pub fn sys_faccessat2(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    access_at(ctx, args, args.int_arg(0), args.arg(1), args.int_arg(3), AccessKind::Read)
}

fn inspect(
    ctx: &mut HandlerContext<'_>,
    args: &SyscallArgs,
    dirfd: Option<i32>,
    path_addr: u64,
    follow: bool,
) -> HandlerResult {
    if args.failed() {
        return Ok(None);
    }
    let file = ctx.resolve(path_addr, dirfd, follow)?;
    ctx.emit(&file, AccessKind::Read);
    Ok(None)
}

/// A path relative to `dirfd`. An empty path with AT_EMPTY_PATH, or a null one, names `dirfd`
/// itself, which is the working directory for AT_FDCWD.
fn access_at(
    ctx: &mut HandlerContext<'_>,
    args: &SyscallArgs,
    dirfd: i32,
    path_addr: u64,
    flag_bits: i32,
    kind: AccessKind,
) -> HandlerResult {
    if args.failed() {
        return Ok(None);
    }
    let flags = AtFlags::from_bits_truncate(flag_bits);
    let raw = if path_addr == 0 {
        PathBuf::new()
    } else {
        ctx.resolver.read_path(ctx.process.pid, path_addr)?
    };
    if raw.as_os_str().is_empty() && (path_addr == 0 || flags.contains(AtFlags::AT_EMPTY_PATH)) {
        if dirfd != libc::AT_FDCWD {
            ctx.emit_fd(dirfd, kind);
            return Ok(None);
        }
        let path = ctx.process.cwd.clone();
        let identity = ctx.resolver.identity(&path, true)?;
        ctx.emit(&Resolved { path, identity }, kind);
        return Ok(None);
    }
    let path = ctx.resolver.absolute(&*ctx.process, &raw, Some(dirfd))?;
    let identity = ctx
        .resolver
        .identity(&path, !flags.contains(AtFlags::AT_SYMLINK_NOFOLLOW))?;
    ctx.emit(&Resolved { path, identity }, kind);
    Ok(None)
}

// -----------------------------------------------------------------------------
// Namespace changes

pub fn sys_rename(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    rename(ctx, args, (None, args.arg(0)), (None, args.arg(1)))
}

/// renameat, renameat2
pub fn sys_renameat(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    rename(
        ctx,
        args,
        (Some(args.int_arg(0)), args.arg(1)),
        (Some(args.int_arg(2)), args.arg(3)),
    )
}

/// Both identities are computed before either edge is recorded so that the pair is emitted
/// together or not at all
fn rename(
    ctx: &mut HandlerContext<'_>,
    args: &SyscallArgs,
    from: (Option<i32>, u64),
    to: (Option<i32>, u64),
) -> HandlerResult {
    if args.failed() {
        return Ok(None);
    }
    let to = ctx.resolve(to.1, to.0, false)?;
    let from = match ctx.take_snapshot() {
        EntrySnapshot::RenameSource(source) => source,

        // Without an entry snapshot the source identity is what now lives at the destination
        _ => Resolved {
            path: ctx.locate(from.1, from.0)?,
            identity: to.identity,
        },
    };
    ctx.emit_rename(&from, &to);
    Ok(None)
}

/// unlink, rmdir
pub fn sys_unlink(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    delete(ctx, args, None, args.arg(0))
}

pub fn sys_unlinkat(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    delete(ctx, args, Some(args.int_arg(0)), args.arg(1))
}

fn delete(ctx: &mut HandlerContext<'_>, args: &SyscallArgs, dirfd: Option<i32>, path_addr: u64) -> HandlerResult {
    if args.failed() {
        return Ok(None);
    }
    let victim = match ctx.take_snapshot() {
        EntrySnapshot::Victim(victim) => victim,

        // The link is gone, so this only succeeds if another name took its place
        _ => ctx.resolve(path_addr, dirfd, false)?,
    };
    ctx.emit(&victim, AccessKind::Delete);
    Ok(None)
}

pub fn sys_mkdir(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    create(ctx, args, None, args.arg(0))
}

pub fn sys_mkdirat(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    create(ctx, args, Some(args.int_arg(0)), args.arg(1))
}

pub fn sys_symlink(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    create(ctx, args, None, args.arg(1))
}

pub fn sys_symlinkat(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    create(ctx, args, Some(args.int_arg(1)), args.arg(2))
}

pub fn sys_link(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    create(ctx, args, None, args.arg(1))
}

pub fn sys_linkat(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    create(ctx, args, Some(args.int_arg(2)), args.arg(3))
}

fn create(ctx: &mut HandlerContext<'_>, args: &SyscallArgs, dirfd: Option<i32>, path_addr: u64) -> HandlerResult {
    if args.failed() {
        return Ok(None);
    }
    let file = ctx.resolve(path_addr, dirfd, false)?;
    ctx.emit(&file, AccessKind::Create);
    Ok(None)
}

// -----------------------------------------------------------------------------
// Metadata and size changes

/// chmod, truncate, chown, utime, utimes, setxattr, removexattr
pub fn sys_chmod(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    modify(ctx, args, None, args.arg(0), true)
}

/// lchown, lsetxattr, lremovexattr act on a symlink itself
pub fn sys_lchown(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    modify(ctx, args, None, args.arg(0), false)
}

/// fchmod, ftruncate, fchown, fallocate, fsetxattr, fremovexattr
pub fn sys_fchmod(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    sys_write(ctx, args)
}

pub fn sys_fchmodat(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    modify(ctx, args, Some(args.int_arg(0)), args.arg(1), true)
}

pub fn sys_fchownat(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    access_at(ctx, args, args.int_arg(0), args.arg(1), args.int_arg(4), AccessKind::Write)
}

/// A null path makes utimensat act on `dirfd`
pub fn sys_utimensat(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    access_at(ctx, args, args.int_arg(0), args.arg(1), args.int_arg(3), AccessKind::Write)
}

pub fn sys_futimesat(ctx: &mut HandlerContext<'_>, args: &SyscallArgs) -> HandlerResult {
    access_at(ctx, args, args.int_arg(0), args.arg(1), 0, AccessKind::Write)
}

fn modify(
    ctx: &mut HandlerContext<'_>,
    args: &SyscallArgs,
    dirfd: Option<i32>,
    path_addr: u64,
    follow: bool,
) -> HandlerResult {
    if args.failed() {
        return Ok(None);
    }
    let file = ctx.resolve(path_addr, dirfd, follow)?;
    ctx.emit(&file, AccessKind::Write);
    Ok(None)
}
