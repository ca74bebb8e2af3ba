use std::collections::BTreeMap;
use std::path::PathBuf;

use nix::fcntl::OFlag;
use nix::unistd::Pid;

use crate::resolver::FileIdentity;

/// What an open descriptor refers to
#[derive(Debug, Clone, PartialEq)]
pub enum FdKind {
    /// A filesystem object. The identity is missing if the file could not be stat'ed when it was
    /// opened (e.g. it was removed in between).
    File {
        path: PathBuf,
        identity: Option<FileIdentity>,
    },
    Pipe,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FdEntry {
    pub owner: Pid,
    pub fd: i32,
    pub kind: FdKind,
    pub flags: OFlag,
}

impl FdEntry {
    pub fn file(owner: Pid, fd: i32, path: PathBuf, identity: Option<FileIdentity>, flags: OFlag) -> Self {
        Self {
            owner,
            fd,
            kind: FdKind::File { path, identity },
            flags,
        }
    }

    pub fn pipe(owner: Pid, fd: i32, flags: OFlag) -> Self {
        Self {
            owner,
            fd,
            kind: FdKind::Pipe,
            flags,
        }
    }

    pub fn identity(&self) -> Option<FileIdentity> {
        match self.kind {
            FdKind::File { identity, .. } => identity,
            FdKind::Pipe => None,
        }
    }

    pub fn cloexec(&self) -> bool {
        self.flags.contains(OFlag::O_CLOEXEC)
    }
}

/// Returns true if the access mode in `flags` permits writing
pub fn opened_for_writing(flags: OFlag) -> bool {
    let mode = flags & OFlag::O_ACCMODE;
    mode == OFlag::O_WRONLY || mode == OFlag::O_RDWR
}

/// Descriptor number to entry mapping of one process (or of a group of processes sharing a table)
#[derive(Debug, Clone, Default)]
pub struct FdTable {
    fds: BTreeMap<i32, FdEntry>,
}

impl FdTable {
    pub fn get(&self, fd: i32) -> Option<&FdEntry> {
        self.fds.get(&fd)
    }

    pub fn insert(&mut self, entry: FdEntry) {
        self.fds.insert(entry.fd, entry);
    }

    pub fn remove(&mut self, fd: i32) -> Option<FdEntry> {
        self.fds.remove(&fd)
    }

    /// Makes `new_fd` refer to what `old_fd` refers to. If `old_fd` is untracked, any stale entry
    /// for `new_fd` is dropped since it no longer refers to a known file.
    pub fn dup(&mut self, old_fd: i32, new_fd: i32, cloexec: bool) {
        match self.fds.get(&old_fd).cloned() {
            Some(mut entry) => {
                entry.fd = new_fd;
                entry.flags.set(OFlag::O_CLOEXEC, cloexec);
                self.fds.insert(new_fd, entry);
            }
            None => {
                self.fds.remove(&new_fd);
            }
        }
    }

    pub fn set_cloexec(&mut self, fd: i32, cloexec: bool) {
        if let Some(entry) = self.fds.get_mut(&fd) {
            entry.flags.set(OFlag::O_CLOEXEC, cloexec);
        }
    }

    /// Drops every descriptor marked close-on-exec
    pub fn close_on_exec(&mut self) {
        self.fds.retain(|_, entry| !entry.cloexec());
    }

    /// Closes descriptors in `first..=last`, or only marks them close-on-exec
    pub fn close_range(&mut self, first: i32, last: i32, cloexec_only: bool) {
        if first > last {
            return;
        }
        if cloexec_only {
            for (_, entry) in self.fds.range_mut(first..=last) {
                entry.flags.insert(OFlag::O_CLOEXEC);
            }
        } else {
            self.fds.retain(|fd, _| *fd < first || *fd > last);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &FdEntry> {
        self.fds.values()
    }

    /// A copy of this table whose entries all belong to `owner`
    pub fn copy_for(&self, owner: Pid) -> FdTable {
        let mut copy = self.clone();
        for entry in copy.fds.values_mut() {
            entry.owner = owner;
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(fd: i32, ino: u64) -> FdEntry {
        FdEntry::file(
            Pid::from_raw(1),
            fd,
            PathBuf::from(format!("/f{}", ino)),
            Some(FileIdentity { dev: 1, ino }),
            OFlag::O_RDONLY,
        )
    }

    #[test]
    fn dup_copies_identity_and_survives_close() {
        let mut table = FdTable::default();
        table.insert(entry(3, 10));
        table.dup(3, 7, false);
        table.remove(3);
        assert_eq!(table.get(7).and_then(FdEntry::identity), Some(FileIdentity { dev: 1, ino: 10 }));
        assert_eq!(table.get(7).map(|e| e.fd), Some(7));
    }

    #[test]
    fn dup_of_unknown_source_drops_target() {
        let mut table = FdTable::default();
        table.insert(entry(4, 11));
        table.dup(9, 4, false);
        assert!(table.get(4).is_none());
    }

    #[test]
    fn close_on_exec_keeps_inheritable() {
        let mut table = FdTable::default();
        table.insert(entry(3, 1));
        table.insert(entry(4, 2));
        table.set_cloexec(4, true);
        table.close_on_exec();
        assert!(table.get(3).is_some());
        assert!(table.get(4).is_none());
    }

    #[test]
    fn close_range_removes_inclusive_bounds() {
        let mut table = FdTable::default();
        for fd in 3..8 {
            table.insert(entry(fd, fd as u64));
        }
        table.close_range(4, 6, false);
        let left: Vec<i32> = table.iter().map(|e| e.fd).collect();
        assert_eq!(left, vec![3, 7]);
    }

    #[test]
    fn copy_belongs_to_new_owner() {
        let mut table = FdTable::default();
        table.insert(entry(3, 1));
        table.insert(entry(5, 2));
        let copy = table.copy_for(Pid::from_raw(2));
        assert!(copy.iter().all(|e| e.owner == Pid::from_raw(2)));
        assert_eq!(copy.get(5).and_then(FdEntry::identity), Some(FileIdentity { dev: 1, ino: 2 }));
        assert!(table.iter().all(|e| e.owner == Pid::from_raw(1)));
    }

    #[test]
    fn write_access_modes() {
        assert!(!opened_for_writing(OFlag::O_RDONLY));
        assert!(opened_for_writing(OFlag::O_WRONLY | OFlag::O_CREAT));
        assert!(opened_for_writing(OFlag::O_RDWR));
    }
}
