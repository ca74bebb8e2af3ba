use std::path::{Path, PathBuf};

use clap::{crate_version, value_parser, Arg, ArgAction, ArgMatches, Command};
use log::LevelFilter;

use crate::export::Format;
use crate::logger::AppLogger;

static LOGGER: AppLogger = AppLogger;

#[derive(Debug)]
pub struct App {
    pub args: ArgMatches,
}

fn command() -> Command {
    Command::new("depwatch")
        .version(crate_version!())
        .about("depwatch: records the files a command and its sub-processes read and write")
        .author("Simon Pugnet")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Increases verbosity of program output (can be specified multiple times)")
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new("load_config")
                .short('l')
                .long("load-config")
                .help("Whether to load a previously saved config (see --config-file)")
                .action(ArgAction::SetTrue)
                .requires("config_file"),
        )
        .arg(
            Arg::new("save_config")
                .short('s')
                .long("save-config")
                .help("Whether to save the tracer config to a file (see --config-file)")
                .action(ArgAction::SetTrue)
                .requires("config_file"),
        )
        .arg(
            Arg::new("config_file")
                .short('f')
                .long("config-file")
                .value_name("FILENAME")
                .help("Name of tracer config JSON to load/save"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILENAME")
                .help("Where to write the dependency graph (default: stdout)"),
        )
        .arg(
            Arg::new("format")
                .long("format")
                .value_parser(["json", "make"])
                .default_value("json")
                .help("Format of the dependency graph"),
        )
        .arg(
            Arg::new("ignore_prefix")
                .long("ignore-prefix")
                .value_name("DIR")
                .value_parser(value_parser!(PathBuf))
                .action(ArgAction::Append)
                .default_values(["/proc", "/sys", "/dev"])
                .help("Leave files under DIR out of the output (can be specified multiple times)"),
        )
        .arg(
            Arg::new("query")
                .long("query")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Print the files that depend on FILE instead of the whole graph"),
        )
        .arg(
            Arg::new("tracee_cmd")
                .help("Full tracee command and arguments (e.g. \"make -j4\")")
                .num_args(1..)
                .trailing_var_arg(true)
                .allow_hyphen_values(true)
                .required(true),
        )
}

impl App {
    pub fn new() -> Self {
        let app = Self {
            args: command().get_matches(),
        };

        // Set up logger
        if log::set_logger(&LOGGER)
            .map(|()| log::set_max_level(app.level_filter()))
            .is_err()
        {
            eprintln!("ERROR: unable to set application logger instance");
        }

        app
    }

    #[cfg(test)]
    fn from_args(args: &[&str]) -> Result<Self, clap::Error> {
        Ok(Self {
            args: command().try_get_matches_from(args)?,
        })
    }

    pub fn level_filter(&self) -> LevelFilter {
        match self.args.get_count("verbose") {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    pub fn tracee_cmd(&self) -> Option<Vec<&str>> {
        self.args
            .get_many::<String>("tracee_cmd")
            .map(|values| values.map(String::as_str).collect())
    }

    pub fn config_file(&self) -> Option<&str> {
        self.args.get_one::<String>("config_file").map(String::as_str)
    }

    pub fn output(&self) -> Option<&str> {
        self.args.get_one::<String>("output").map(String::as_str)
    }

    pub fn ignored_prefixes(&self) -> Vec<PathBuf> {
        self.args
            .get_many::<PathBuf>("ignore_prefix")
            .map(|values| values.cloned().collect())
            .unwrap_or_default()
    }

    pub fn query(&self) -> Option<&Path> {
        self.args.get_one::<PathBuf>("query").map(PathBuf::as_path)
    }

    pub fn format(&self) -> Format {
        match self.args.get_one::<String>("format").map(String::as_str) {
            Some("make") => Format::Make,
            _ => Format::Json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracee_command_keeps_its_own_flags() {
        let app = App::from_args(&["depwatch", "-vv", "--format", "make", "cc", "-c", "a.c"]).unwrap();
        assert_eq!(app.tracee_cmd().unwrap(), vec!["cc", "-c", "a.c"]);
        assert_eq!(app.level_filter(), LevelFilter::Trace);
        assert_eq!(app.format(), Format::Make);
        assert_eq!(app.output(), None);
        assert_eq!(app.query(), None);
    }

    #[test]
    fn ignored_prefixes_default_to_kernel_filesystems() {
        let app = App::from_args(&["depwatch", "make"]).unwrap();
        assert_eq!(
            app.ignored_prefixes(),
            vec![PathBuf::from("/proc"), PathBuf::from("/sys"), PathBuf::from("/dev")]
        );

        let app = App::from_args(&["depwatch", "--ignore-prefix", "/tmp", "--ignore-prefix", "/var", "make"]).unwrap();
        assert_eq!(app.ignored_prefixes(), vec![PathBuf::from("/tmp"), PathBuf::from("/var")]);
    }

    #[test]
    fn query_takes_a_file() {
        let app = App::from_args(&["depwatch", "--query", "src/a.c", "make", "-j4"]).unwrap();
        assert_eq!(app.query(), Some(Path::new("src/a.c")));
        assert_eq!(app.tracee_cmd().unwrap(), vec!["make", "-j4"]);
    }

    #[test]
    fn loading_config_requires_a_file() {
        assert!(App::from_args(&["depwatch", "-l", "true"]).is_err());
        let app = App::from_args(&["depwatch", "-l", "-f", "conf.json", "true"]).unwrap();
        assert!(app.args.get_flag("load_config"));
        assert_eq!(app.config_file(), Some("conf.json"));
        assert_eq!(app.format(), Format::Json);
    }

    #[test]
    fn tracee_command_is_required() {
        assert!(App::from_args(&["depwatch", "-v"]).is_err());
    }
}
