use std::collections::HashSet;
use std::ffi::CString;
use std::fs;
use std::io::{self, IoSliceMut};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, trace, warn};
use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::signal::{self, Signal};
use nix::sys::uio::{self, RemoteIoVec};
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use nix::unistd::{self, Pid};

use crate::error::TraceError;
use crate::platforms::PlatformHandler;
use crate::resolver::MemoryReader;
use crate::tracker::DependencyTracker;

/// Reads tracee memory with `process_vm_readv`
#[derive(Debug, Default)]
pub struct TraceeMemory;

impl MemoryReader for TraceeMemory {
    fn read_bytes(&self, pid: Pid, addr: usize, len: usize) -> io::Result<Vec<u8>> {
        let mut buf: Vec<u8> = vec![0; len];
        let remote_iovec = RemoteIoVec { base: addr, len };
        let read = uio::process_vm_readv(
            pid,
            &mut [IoSliceMut::new(buf.as_mut_slice())],
            &[remote_iovec],
        )
        .map_err(io::Error::from)?;
        buf.truncate(read);
        Ok(buf)
    }
}

pub fn exec_child(cmd: Vec<&str>) -> Result<(), String> {
    ptrace::traceme().map_err(|_| "CHILD: could not enable tracing by parent (PTRACE_TRACEME failed)")?;

    let child_args = cmd
        .iter()
        .map(|v| CString::new(*v))
        .collect::<Result<Vec<CString>, _>>()
        .map_err(|_| "Unable to create CString from tracee command")?;
    let program = child_args.first().ok_or("Empty tracee command")?;

    unistd::execvp(program, child_args.as_slice())
        .map_err(|e| format!("unable to execute {:?}: {}", program, e))?;
    Ok(())
}

pub fn wait_child(pid: Pid) -> Result<WaitStatus, TraceError> {
    wait::waitpid(pid, None).map_err(|source| TraceError::Tracing { pid, source })
}

/// Working directory of a live process
pub fn process_cwd(pid: Pid) -> io::Result<PathBuf> {
    fs::read_link(format!("/proc/{}/cwd", pid))
}

/// Registers every descriptor `pid` currently has open on a filesystem path. Pipes, sockets and
/// anonymous inodes show up as non-absolute link targets and are skipped.
pub fn seed_descriptors(tracker: &mut DependencyTracker<'_>, pid: Pid) -> io::Result<()> {
    for entry in fs::read_dir(format!("/proc/{}/fd", pid))? {
        let entry = entry?;
        let fd = match entry.file_name().to_str().and_then(|s| s.parse::<i32>().ok()) {
            Some(fd) => fd,
            None => continue,
        };
        if let Ok(target) = fs::read_link(entry.path()) {
            if target.is_absolute() {
                tracker.add_inherited_fd(pid, fd, &target);
            }
        }
    }
    Ok(())
}

/// Resumes a tracee until its next syscall boundary. A tracee that vanished in the meantime is
/// not an error.
fn resume(pid: Pid, sig: Option<Signal>) {
    if let Err(e) = ptrace::syscall(pid, sig) {
        debug!("Unable to resume process {}: {}", pid, e);
    }
}

fn kill_all(tracker: &DependencyTracker<'_>, held: &HashSet<Pid>) {
    for pid in tracker.pids().into_iter().chain(held.iter().copied()) {
        let _ = signal::kill(pid, Signal::SIGKILL);
    }
}

/// Main tracing loop. Runs until every tracee has exited, the session is interrupted, or an
/// unhandled syscall is seen.
///
/// Returns true if the session was interrupted.
pub fn child_loop(
    root: Pid,
    platform: &dyn PlatformHandler,
    tracker: &mut DependencyTracker<'_>,
    interrupted: &AtomicBool,
) -> Result<bool, TraceError> {
    // Processes stopped between syscall entry and exit
    let mut in_syscall: HashSet<Pid> = HashSet::new();

    // New tracees that stopped before their parent's spawn was seen; kept stopped until then
    let mut held: HashSet<Pid> = HashSet::new();

    // Registered children whose initial SIGSTOP has not been seen yet
    let mut starting: HashSet<Pid> = HashSet::new();

    resume(root, None);

    loop {
        if interrupted.load(Ordering::SeqCst) {
            warn!("Interrupted, killing all tracees");
            kill_all(tracker, &held);
            tracker.abort();
            return Ok(true);
        }

        let status = match wait::waitpid(None::<Pid>, Some(WaitPidFlag::__WALL)) {
            Ok(status) => status,
            Err(Errno::ECHILD) => break,
            Err(Errno::EINTR) => continue,
            Err(source) => return Err(TraceError::Tracing { pid: root, source }),
        };

        match status {
            WaitStatus::PtraceSyscall(pid) => {
                let regs = match ptrace::getregs(pid) {
                    Ok(regs) => regs,
                    Err(e) => {
                        warn!("Unable to get syscall registers of process {}: {}", pid, e);
                        in_syscall.remove(&pid);
                        continue;
                    }
                };
                if in_syscall.remove(&pid) {
                    match tracker.syscall_exit(pid, platform.return_value(&regs)) {
                        Ok(Some(spawn)) => release(spawn.child, &mut held, &mut starting),
                        Ok(None) => {}
                        Err(e) => {
                            kill_all(tracker, &held);
                            tracker.abort();
                            return Err(e);
                        }
                    }
                } else {
                    in_syscall.insert(pid);
                    tracker.syscall_entry(pid, platform.entry(&regs));
                }
                resume(pid, None);
            }

            WaitStatus::PtraceEvent(pid, _, event) => {
                if event == ptrace::Event::PTRACE_EVENT_FORK as i32
                    || event == ptrace::Event::PTRACE_EVENT_VFORK as i32
                    || event == ptrace::Event::PTRACE_EVENT_CLONE as i32
                {
                    match ptrace::getevent(pid) {
                        Ok(child) => {
                            let child = Pid::from_raw(child as i32);
                            match tracker.complete_spawn(pid, child) {
                                Ok(_) => release(child, &mut held, &mut starting),
                                Err(e) => {
                                    kill_all(tracker, &held);
                                    tracker.abort();
                                    return Err(e);
                                }
                            }
                        }
                        Err(e) => warn!("Unable to get new child of process {}: {}", pid, e),
                    }
                } else if event == ptrace::Event::PTRACE_EVENT_EXEC as i32 {
                    trace!("Process {} exec event", pid);
                }
                resume(pid, None);
            }

            WaitStatus::Stopped(pid, sig) => {
                if !tracker.is_traced(pid) {
                    trace!("Holding new process {} until its parent's spawn is seen", pid);
                    held.insert(pid);
                } else if sig == Signal::SIGSTOP && starting.remove(&pid) {
                    resume(pid, None);
                } else {
                    // Signal-delivery stop: pass the signal on to the tracee
                    resume(pid, Some(sig));
                }
            }

            WaitStatus::Exited(pid, _) | WaitStatus::Signaled(pid, _, _) => {
                in_syscall.remove(&pid);
                held.remove(&pid);
                starting.remove(&pid);
                tracker.process_exit(pid);
                if pid == root {
                    info!("Root process {} terminated", pid);
                }
            }

            _ => {}
        }
    }

    Ok(false)
}

/// A child has been registered: resume it if it is already waiting, otherwise expect its initial
/// SIGSTOP
fn release(child: Pid, held: &mut HashSet<Pid>, starting: &mut HashSet<Pid>) {
    if held.remove(&child) {
        resume(child, None);
    } else {
        starting.insert(child);
    }
}
