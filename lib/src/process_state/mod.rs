pub mod files;

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use log::debug;
use nix::unistd::Pid;

use crate::syscalls::{EntrySnapshot, SyscallEntry};
use files::{FdEntry, FdTable};

/// How a spawned process gets its descriptor table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdSharing {
    /// Thread-like clone (CLONE_FILES): both processes alias one table
    Shared,
    /// fork/vfork: the child starts with a copy and diverges immediately
    Copied,
}

/// A syscall that has entered but not yet completed
#[derive(Debug)]
pub struct PendingSyscall {
    pub entry: SyscallEntry,
    pub snapshot: EntrySnapshot,
}

#[derive(Debug)]
pub struct ProcessState {
    pub pid: Pid,
    pub parent: Option<Pid>,
    pub cwd: PathBuf,
    fds: Rc<RefCell<FdTable>>,
    pub(crate) pending: Option<PendingSyscall>,
}

impl ProcessState {
    pub fn new(pid: Pid, parent: Option<Pid>, cwd: PathBuf) -> Self {
        Self {
            pid,
            parent,
            cwd,
            fds: Rc::new(RefCell::new(FdTable::default())),
            pending: None,
        }
    }

    pub fn fd(&self, fd: i32) -> Option<FdEntry> {
        self.fds.borrow().get(fd).cloned()
    }

    pub fn insert_fd(&self, entry: FdEntry) {
        self.fds.borrow_mut().insert(entry);
    }

    pub fn close_fd(&self, fd: i32) {
        if self.fds.borrow_mut().remove(fd).is_none() {
            debug!("Process {} closed untracked FD {}", self.pid, fd);
        }
    }

    pub fn dup_fd(&self, old_fd: i32, new_fd: i32, cloexec: bool) {
        self.fds.borrow_mut().dup(old_fd, new_fd, cloexec);
    }

    pub fn set_cloexec(&self, fd: i32, cloexec: bool) {
        self.fds.borrow_mut().set_cloexec(fd, cloexec);
    }

    pub fn close_range(&self, first: i32, last: i32, cloexec_only: bool) {
        self.fds.borrow_mut().close_range(first, last, cloexec_only);
    }

    /// Gives this process a private copy of its descriptor table
    pub fn unshare_descriptors(&mut self) {
        let table = self.fds.borrow().copy_for(self.pid);
        self.fds = Rc::new(RefCell::new(table));
    }

    /// Applies a successful exec: the table stops being shared with other processes and
    /// close-on-exec descriptors are dropped
    pub fn exec(&mut self) {
        self.unshare_descriptors();
        self.fds.borrow_mut().close_on_exec();
    }

    /// Snapshot of the current descriptor entries
    pub fn descriptors(&self) -> Vec<FdEntry> {
        self.fds.borrow().iter().cloned().collect()
    }

    fn spawn_child(&self, child: Pid, sharing: FdSharing) -> ProcessState {
        let fds = match sharing {
            FdSharing::Shared => Rc::clone(&self.fds),
            FdSharing::Copied => Rc::new(RefCell::new(self.fds.borrow().copy_for(child))),
        };
        ProcessState {
            pid: child,
            parent: Some(self.pid),
            cwd: self.cwd.clone(),
            fds,
            pending: None,
        }
    }
}

/// All traced processes, keyed by pid
#[derive(Debug, Default)]
pub struct ProcessTable {
    processes: HashMap<Pid, ProcessState>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_root(&mut self, pid: Pid, cwd: PathBuf) {
        self.processes.insert(pid, ProcessState::new(pid, None, cwd));
    }

    /// Registers `child` with a copy of the parent's working directory. Returns false if the
    /// parent is unknown or the child is already registered.
    pub fn on_spawn(&mut self, parent: Pid, child: Pid, sharing: FdSharing) -> bool {
        if self.processes.contains_key(&child) {
            return false;
        }
        let state = match self.processes.get(&parent) {
            Some(p) => p.spawn_child(child, sharing),
            None => return false,
        };
        self.processes.insert(child, state);
        true
    }

    /// Forgets a process. Calling this for an unknown pid is a no-op.
    pub fn on_exit(&mut self, pid: Pid) -> Option<ProcessState> {
        self.processes.remove(&pid)
    }

    pub fn get(&self, pid: Pid) -> Option<&ProcessState> {
        self.processes.get(&pid)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut ProcessState> {
        self.processes.get_mut(&pid)
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.processes.contains_key(&pid)
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.processes.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn clear(&mut self) {
        self.processes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::FileIdentity;
    use nix::fcntl::OFlag;

    fn pid(n: i32) -> Pid {
        Pid::from_raw(n)
    }

    fn file(owner: Pid, fd: i32) -> FdEntry {
        FdEntry::file(
            owner,
            fd,
            PathBuf::from("/tmp/x"),
            Some(FileIdentity { dev: 1, ino: 2 }),
            OFlag::O_RDONLY,
        )
    }

    #[test]
    fn copied_table_diverges() {
        let mut table = ProcessTable::new();
        table.insert_root(pid(1), PathBuf::from("/src"));
        table.get(pid(1)).unwrap().insert_fd(file(pid(1), 3));
        assert!(table.on_spawn(pid(1), pid(2), FdSharing::Copied));

        assert_eq!(table.get(pid(2)).unwrap().fd(3).unwrap().owner, pid(2));
        assert_eq!(table.get(pid(1)).unwrap().fd(3).unwrap().owner, pid(1));

        table.get(pid(2)).unwrap().close_fd(3);
        assert!(table.get(pid(1)).unwrap().fd(3).is_some());
        assert!(table.get(pid(2)).unwrap().fd(3).is_none());
    }

    #[test]
    fn shared_table_aliases() {
        let mut table = ProcessTable::new();
        table.insert_root(pid(1), PathBuf::from("/src"));
        assert!(table.on_spawn(pid(1), pid(2), FdSharing::Shared));

        table.get(pid(2)).unwrap().insert_fd(file(pid(2), 5));
        assert_eq!(table.get(pid(1)).unwrap().fd(5).unwrap().owner, pid(2));
        table.get(pid(1)).unwrap().close_fd(5);
        assert!(table.get(pid(2)).unwrap().fd(5).is_none());
    }

    #[test]
    fn exec_unshares_table() {
        let mut table = ProcessTable::new();
        table.insert_root(pid(1), PathBuf::from("/"));
        table.on_spawn(pid(1), pid(2), FdSharing::Shared);
        table.get_mut(pid(2)).unwrap().exec();
        table.get(pid(2)).unwrap().insert_fd(file(pid(2), 4));
        assert!(table.get(pid(1)).unwrap().fd(4).is_none());
    }

    #[test]
    fn cwd_is_copied_at_spawn() {
        let mut table = ProcessTable::new();
        table.insert_root(pid(1), PathBuf::from("/a"));
        table.on_spawn(pid(1), pid(2), FdSharing::Shared);
        table.get_mut(pid(1)).unwrap().cwd = PathBuf::from("/b");
        assert_eq!(table.get(pid(2)).unwrap().cwd, PathBuf::from("/a"));
        assert_eq!(table.get(pid(2)).unwrap().parent, Some(pid(1)));
    }

    #[test]
    fn spawn_from_unknown_parent_is_rejected() {
        let mut table = ProcessTable::new();
        assert!(!table.on_spawn(pid(1), pid(2), FdSharing::Copied));
        assert!(table.is_empty());
    }

    #[test]
    fn exit_is_idempotent() {
        let mut table = ProcessTable::new();
        table.insert_root(pid(1), PathBuf::from("/"));
        assert!(table.on_exit(pid(1)).is_some());
        assert!(table.on_exit(pid(1)).is_none());
    }
}
