//! Renders a finished trace for consumption by other tools

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use depwatch::resolver::Resolved;
use depwatch::{AccessKind, DependencyGraph, FileIdentity, TraceReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Make,
}

pub fn render(report: &TraceReport, format: Format) -> Result<String, String> {
    match format {
        Format::Json => serde_json::to_string_pretty(&to_json(report)).map_err(|e| e.to_string()),
        Format::Make => Ok(to_make(report)),
    }
}

/// Drops edges on files whose last known path lies under one of `prefixes`
pub fn without_prefixes(report: TraceReport, prefixes: &[PathBuf]) -> TraceReport {
    if prefixes.is_empty() {
        return report;
    }
    let mut graph = DependencyGraph::new();
    for edge in report.graph.edges() {
        let path = match report.graph.path_of(&edge.file) {
            Some(path) => path,
            None => continue,
        };
        if prefixes.iter().any(|prefix| path.starts_with(prefix)) {
            continue;
        }
        let file = Resolved {
            path: path.to_path_buf(),
            identity: edge.file,
        };
        graph.record(edge.pid, &file, edge.kind);
    }
    for spawn in report.graph.spawns() {
        graph.record_spawn(spawn.parent, spawn.child);
    }
    TraceReport { graph, ..report }
}

/// Lists, one per line, the files that depend on `target`: the outputs of every process that read
/// it or descends from one that did, repeated until nothing new appears
pub fn query(report: &TraceReport, target: &Path) -> Result<String, String> {
    let graph = &report.graph;
    let canonical = fs::canonicalize(target).unwrap_or_else(|_| target.to_path_buf());
    let identity = match graph.files().find(|(_, path)| *path == canonical) {
        Some((identity, _)) => *identity,
        None => fs::metadata(&canonical)
            .map(|meta| FileIdentity::from(&meta))
            .map_err(|e| format!("Unable to identify {}: {}", target.display(), e))?,
    };
    let mut paths: Vec<&Path> = graph
        .find_deps(&identity)
        .iter()
        .filter_map(|id| graph.path_of(id))
        .collect();
    paths.sort();
    let mut out = String::new();
    for path in paths {
        out.push_str(&path.to_string_lossy());
        out.push('\n');
    }
    Ok(out)
}

fn to_json(report: &TraceReport) -> Value {
    let graph = &report.graph;
    let files: Vec<Value> = graph
        .files()
        .map(|(id, path)| json!({ "dev": id.dev, "ino": id.ino, "path": path }))
        .collect();
    let edges: Vec<Value> = graph
        .edges()
        .iter()
        .map(|e| {
            json!({
                "pid": e.pid,
                "dev": e.file.dev,
                "ino": e.file.ino,
                "kind": e.kind,
                "path": graph.path_of(&e.file),
            })
        })
        .collect();
    let diagnostics: Vec<Value> = report
        .diagnostics
        .iter()
        .map(|d| json!({ "pid": d.pid.as_raw(), "syscall": d.syscall, "message": d.message }))
        .collect();
    json!({
        "files": files,
        "edges": edges,
        "spawns": graph.spawns(),
        "diagnostics": diagnostics,
        "interrupted": report.interrupted,
    })
}

fn escape(path: &Path) -> String {
    let mut out = String::new();
    for c in path.to_string_lossy().chars() {
        match c {
            ' ' | '#' | ':' => {
                out.push('\\');
                out.push(c);
            }
            '$' => out.push_str("$$"),
            _ => out.push(c),
        }
    }
    out
}

/// Files a process read without the traced tree having produced them, and files it produced
#[derive(Default)]
struct ProcessFiles {
    inputs: BTreeSet<FileIdentity>,
    outputs: BTreeSet<FileIdentity>,
}

/// One rule per process: its inputs as prerequisites, its children as further prerequisites and
/// its outputs in a `<pid>_OUTPUTS` variable
fn to_make(report: &TraceReport) -> String {
    let graph = &report.graph;

    // Anything created, written or renamed into place somewhere in the tree is not a source
    let produced: BTreeSet<FileIdentity> = graph
        .edges()
        .iter()
        .filter(|e| e.kind.is_output())
        .map(|e| e.file)
        .collect();
    let deleted: BTreeSet<FileIdentity> = graph
        .edges()
        .iter()
        .filter(|e| e.kind == AccessKind::Delete)
        .map(|e| e.file)
        .collect();

    let mut processes: BTreeMap<i32, ProcessFiles> = BTreeMap::new();
    for edge in graph.edges() {
        if deleted.contains(&edge.file) {
            continue;
        }
        let entry = processes.entry(edge.pid).or_default();
        if edge.kind.is_input() {
            if !produced.contains(&edge.file) {
                entry.inputs.insert(edge.file);
            }
        } else if produced.contains(&edge.file) {
            entry.outputs.insert(edge.file);
        }
    }
    for spawn in graph.spawns() {
        processes.entry(spawn.parent).or_default();
    }

    let names = |ids: &BTreeSet<FileIdentity>| -> Vec<String> {
        ids.iter()
            .filter_map(|id| graph.path_of(id))
            .map(escape)
            .collect()
    };

    let mut out = String::new();
    for (pid, files) in &processes {
        out.push_str(&format!("{}: {}\n", pid, names(&files.inputs).join(" ")));
        let children: Vec<String> = graph
            .spawns()
            .iter()
            .filter(|s| s.parent == *pid)
            .map(|s| s.child.to_string())
            .collect();
        if !children.is_empty() {
            out.push_str(&format!("{}: {}\n", pid, children.join(" ")));
        }
        if !files.outputs.is_empty() {
            out.push_str(&format!("{}_OUTPUTS := {}\n", pid, names(&files.outputs).join(" ")));
        }
    }
    out
}
