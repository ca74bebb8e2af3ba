mod app;
mod export;
mod logger;

use std::fs;
use std::io::{self, Write};

use log::{debug, error, trace, warn};

use depwatch::tracer_conf::{RuntimeConf, TracerConf};
use depwatch::{DependencyEdge, TraceError};

use crate::app::App;

fn main() -> Result<(), String> {
    let app = App::new();

    // Get the tracee command as a Vec<&str>
    let child_cmd = app.tracee_cmd().ok_or("Unable to get tracee command")?;

    // Load TracerConf from file if necessary
    let conf: TracerConf = if app.args.get_flag("load_config") {
        match app.config_file() {
            Some(filename) => match TracerConf::from_file(filename) {
                Ok(c) => {
                    debug!("Configuration loaded from {}", filename);
                    c
                }
                Err(e) => {
                    error!("Unable to read tracer configuration from file {}: {}", filename, e);
                    TracerConf::default()
                }
            },
            None => TracerConf::default(),
        }
    } else {
        TracerConf::default()
    };

    // Stream edges to the log as they are found
    let mut runtime_conf = RuntimeConf::default();
    runtime_conf.set_edge_cb(Box::new(|edge: &DependencyEdge| {
        trace!("New edge: process {} {} {}:{}", edge.pid, edge.kind, edge.file.dev, edge.file.ino);
    }));

    // Trace the process
    let report = match depwatch::trace(child_cmd, &conf, &runtime_conf) {
        Ok(report) => report,
        Err(TraceError::UnhandledSyscall { number, pid }) => {
            return Err(format!(
                "process {} issued syscall {} which has no handler; add it to \"ignored_syscalls\" \
                 in a config file (--load-config) if it cannot affect dependencies",
                pid, number
            ));
        }
        Err(e) => return Err(e.to_string()),
    };

    for diag in &report.diagnostics {
        warn!("Process {}, syscall {}: {}", diag.pid, diag.syscall, diag.message);
    }
    if report.interrupted {
        warn!("Tracing was interrupted, the dependency graph is incomplete");
    }

    // Write the dependency graph, or only the files depending on the queried one
    let report = export::without_prefixes(report, &app.ignored_prefixes());
    let rendered = match app.query() {
        Some(target) => export::query(&report, target)?,
        None => export::render(&report, app.format())?,
    };
    match app.output() {
        Some(filename) => fs::write(filename, rendered)
            .map_err(|e| format!("Unable to write dependency graph to {}: {}", filename, e))?,
        None => io::stdout()
            .write_all(rendered.as_bytes())
            .map_err(|e| format!("Unable to write dependency graph: {}", e))?,
    }

    // Save the tracer config based on args
    if app.args.get_flag("save_config") {
        match app.config_file() {
            Some(filename) => {
                if let Err(e) = conf.write_to_file(filename) {
                    error!("Unable to write tracer configuration to file {}: {}", filename, e);
                }
            }
            None => warn!("The program was requested to save the tracer configuration, but no filename was specified"),
        };
    }

    Ok(())
}
