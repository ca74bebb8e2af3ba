use serde::{Deserialize, Serialize};
use serde_json;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::graph::DependencyEdge;

/// Default bound on strings read out of a tracee, matching PATH_MAX
pub const DEFAULT_MAX_PATH_LEN: usize = 4096;

/// Configuration for the tracer while it is tracing a child process
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TracerConf {
    /// Maximum length of a path argument read from tracee memory
    pub max_path_len: usize,

    /// Syscall numbers to treat as having no dependency effect, in addition to the built-in list
    pub ignored_syscalls: BTreeSet<i64>,
}

impl Default for TracerConf {
    fn default() -> Self {
        Self {
            max_path_len: DEFAULT_MAX_PATH_LEN,
            ignored_syscalls: BTreeSet::new(),
        }
    }
}

impl TracerConf {
    /// Loads the `TracerConf` from a JSON file
    pub fn from_file(filename: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let path = Path::new(filename);
        let mut file = File::open(path)?;
        let mut ser = String::new();
        file.read_to_string(&mut ser)?;
        serde_json::from_str(ser.as_str()).map_err(|e| e.into())
    }

    /// Marks an otherwise unhandled syscall number as ignored
    pub fn ignore_syscall(&mut self, number: i64) {
        self.ignored_syscalls.insert(number);
    }

    /// Saves the `TracerConf` to a JSON file
    pub fn write_to_file(&self, filename: &str) -> Result<(), Box<dyn std::error::Error>> {
        let ser: String = serde_json::to_string_pretty(self)?;
        let path = Path::new(filename);
        let mut file = File::create(path)?;
        file.write_all(ser.as_bytes()).map_err(|e| e.into())
    }
}

/// Configuration of the runtime environment using the `depwatch` library. Currently contains an
/// optional callback which is invoked for every new dependency edge as soon as it is recorded.
#[derive(Default)]
pub struct RuntimeConf<'a> {
    pub edge_cb: Option<Box<dyn Fn(&DependencyEdge) + 'a>>,
}

impl<'a> RuntimeConf<'a> {
    /// Assigns the callback function reference
    pub fn set_edge_cb(&mut self, cb: Box<dyn Fn(&DependencyEdge) + 'a>) {
        self.edge_cb = Some(cb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("conf.json");
        let filename = file.to_str().unwrap();

        let mut conf = TracerConf::default();
        conf.ignore_syscall(165);
        conf.write_to_file(filename).unwrap();

        let loaded = TracerConf::from_file(filename).unwrap();
        assert_eq!(loaded, conf);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let conf: TracerConf = serde_json::from_str(r#"{"ignored_syscalls": [165, 166]}"#).unwrap();
        assert_eq!(conf.max_path_len, DEFAULT_MAX_PATH_LEN);
        assert!(conf.ignored_syscalls.contains(&166));
    }
}
