use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::resolver::{FileIdentity, Resolved};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AccessKind {
    Read,
    Write,
    RenameFrom,
    RenameTo,
    Delete,
    Create,
}

impl AccessKind {
    /// True for accesses that make the file an input of the process
    pub fn is_input(self) -> bool {
        self == AccessKind::Read
    }

    /// True for accesses that leave the file with new contents or a new name
    pub fn is_output(self) -> bool {
        matches!(self, AccessKind::Write | AccessKind::Create | AccessKind::RenameTo)
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            AccessKind::Read => "read",
            AccessKind::Write => "write",
            AccessKind::RenameFrom => "rename-from",
            AccessKind::RenameTo => "rename-to",
            AccessKind::Delete => "delete",
            AccessKind::Create => "create",
        };
        write!(f, "{}", s)
    }
}

/// A (process, file, access) fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub pid: i32,
    pub file: FileIdentity,
    pub kind: AccessKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpawnEdge {
    pub parent: i32,
    pub child: i32,
}

/// Append-only, deduplicated set of dependency and spawn edges.
///
/// Edges are kept in the order they were first recorded. The last known path of every identity
/// is kept alongside for reporting.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    edges: Vec<DependencyEdge>,
    seen: HashSet<DependencyEdge>,
    spawns: Vec<SpawnEdge>,
    spawns_seen: HashSet<SpawnEdge>,
    paths: BTreeMap<FileIdentity, PathBuf>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an edge for a resolved file. Returns the edge if it was not already present.
    pub fn record(&mut self, pid: i32, file: &Resolved, kind: AccessKind) -> Option<DependencyEdge> {
        self.paths
            .entry(file.identity)
            .or_insert_with(|| file.path.clone());
        self.insert(DependencyEdge {
            pid,
            file: file.identity,
            kind,
        })
    }

    /// Records both halves of a rename. The destination becomes the identity's last known name.
    pub fn record_rename(
        &mut self,
        pid: i32,
        from: &Resolved,
        to: &Resolved,
    ) -> (Option<DependencyEdge>, Option<DependencyEdge>) {
        let a = self.record(pid, from, AccessKind::RenameFrom);
        let b = self.record(pid, to, AccessKind::RenameTo);
        self.paths.insert(to.identity, to.path.clone());
        (a, b)
    }

    pub fn record_spawn(&mut self, parent: i32, child: i32) -> bool {
        let edge = SpawnEdge { parent, child };
        if self.spawns_seen.insert(edge) {
            self.spawns.push(edge);
            true
        } else {
            false
        }
    }

    /// Remembers a name for `identity` without recording an access
    pub fn name(&mut self, identity: FileIdentity, path: &Path) {
        self.paths
            .entry(identity)
            .or_insert_with(|| path.to_path_buf());
    }

    fn insert(&mut self, edge: DependencyEdge) -> Option<DependencyEdge> {
        if self.seen.insert(edge) {
            self.edges.push(edge);
            Some(edge)
        } else {
            None
        }
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    pub fn spawns(&self) -> &[SpawnEdge] {
        &self.spawns
    }

    pub fn path_of(&self, identity: &FileIdentity) -> Option<&Path> {
        self.paths.get(identity).map(PathBuf::as_path)
    }

    pub fn files(&self) -> impl Iterator<Item = (&FileIdentity, &Path)> {
        self.paths.iter().map(|(id, p)| (id, p.as_path()))
    }

    pub fn contains(&self, pid: i32, file: FileIdentity, kind: AccessKind) -> bool {
        self.seen.contains(&DependencyEdge { pid, file, kind })
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty() && self.spawns.is_empty()
    }

    /// `roots` and every process they spawned, directly or not
    fn descendants(&self, roots: BTreeSet<i32>) -> BTreeSet<i32> {
        let mut found = roots;
        let mut pending: Vec<i32> = found.iter().copied().collect();
        while let Some(parent) = pending.pop() {
            for spawn in self.spawns.iter().filter(|s| s.parent == parent) {
                if found.insert(spawn.child) {
                    pending.push(spawn.child);
                }
            }
        }
        found
    }

    /// Files whose contents may change when `input` changes: the outputs of every process that
    /// read it (and of their descendants), then the outputs of processes reading those, until
    /// nothing new is found. `input` itself is only included if it is produced from one of them.
    pub fn find_deps(&self, input: &FileIdentity) -> BTreeSet<FileIdentity> {
        let mut affected: BTreeSet<FileIdentity> = BTreeSet::new();
        let mut visited: BTreeSet<FileIdentity> = BTreeSet::from([*input]);
        let mut pending = vec![*input];

        while let Some(file) = pending.pop() {
            let readers: BTreeSet<i32> = self
                .edges
                .iter()
                .filter(|e| e.file == file && e.kind.is_input())
                .map(|e| e.pid)
                .collect();
            let writers = self.descendants(readers);
            for edge in self.edges.iter().filter(|e| e.kind.is_output() && writers.contains(&e.pid)) {
                affected.insert(edge.file);
                if visited.insert(edge.file) {
                    pending.push(edge.file);
                }
            }
        }
        affected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(path: &str, ino: u64) -> Resolved {
        Resolved {
            path: PathBuf::from(path),
            identity: FileIdentity { dev: 8, ino },
        }
    }

    #[test]
    fn duplicate_edges_are_dropped() {
        let mut graph = DependencyGraph::new();
        let f = resolved("/a", 1);
        assert!(graph.record(10, &f, AccessKind::Read).is_some());
        assert!(graph.record(10, &f, AccessKind::Read).is_none());
        assert!(graph.record(10, &f, AccessKind::Write).is_some());
        assert_eq!(graph.edges().len(), 2);
    }

    #[test]
    fn delete_does_not_retract_earlier_edges() {
        let mut graph = DependencyGraph::new();
        let f = resolved("/a", 1);
        graph.record(10, &f, AccessKind::Write);
        graph.record(11, &f, AccessKind::Delete);
        assert!(graph.contains(10, f.identity, AccessKind::Write));
        assert!(graph.contains(11, f.identity, AccessKind::Delete));
    }

    #[test]
    fn rename_updates_last_known_path() {
        let mut graph = DependencyGraph::new();
        let from = resolved("/tmp/a.tmp", 5);
        let to = resolved("/tmp/a", 5);
        graph.record(1, &from, AccessKind::Create);
        graph.record_rename(1, &from, &to);
        assert_eq!(graph.path_of(&to.identity), Some(Path::new("/tmp/a")));
        let kinds: Vec<AccessKind> = graph.edges().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![AccessKind::Create, AccessKind::RenameFrom, AccessKind::RenameTo]);
    }

    #[test]
    fn spawn_edges_recorded_once() {
        let mut graph = DependencyGraph::new();
        assert!(graph.record_spawn(1, 2));
        assert!(!graph.record_spawn(1, 2));
        assert_eq!(graph.spawns(), &[SpawnEdge { parent: 1, child: 2 }]);
    }

    #[test]
    fn find_deps_follows_build_chain() {
        let mut graph = DependencyGraph::new();
        let (src, obj, bin) = (resolved("/a.c", 1), resolved("/a.o", 2), resolved("/bin", 3));
        let log = resolved("/build.log", 4);

        // make (1) runs cc (2), which runs as (4), and ld (3)
        graph.record_spawn(1, 2);
        graph.record_spawn(1, 3);
        graph.record_spawn(2, 4);
        graph.record(1, &log, AccessKind::Write);
        graph.record(2, &src, AccessKind::Read);
        graph.record(4, &obj, AccessKind::Create);
        graph.record(4, &obj, AccessKind::Write);
        graph.record(3, &obj, AccessKind::Read);
        graph.record(3, &bin, AccessKind::Write);

        let deps = graph.find_deps(&src.identity);
        assert_eq!(deps, BTreeSet::from([obj.identity, bin.identity]));
        assert_eq!(graph.find_deps(&obj.identity), BTreeSet::from([bin.identity]));
        assert!(graph.find_deps(&bin.identity).is_empty());
    }

    #[test]
    fn find_deps_handles_cycles() {
        let mut graph = DependencyGraph::new();
        let (a, b) = (resolved("/a", 1), resolved("/b", 2));
        graph.record(1, &a, AccessKind::Read);
        graph.record(1, &b, AccessKind::Write);
        graph.record(2, &b, AccessKind::Read);
        graph.record(2, &a, AccessKind::Write);

        assert_eq!(graph.find_deps(&a.identity), BTreeSet::from([a.identity, b.identity]));
    }
}
