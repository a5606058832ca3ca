//! Command-line interface for the realm server binary.

use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;

/// Parsed command-line arguments. Anything set here overrides the config file.
#[derive(Debug, Clone)]
pub struct CliArgs {
    pub config_path: PathBuf,
    pub content_path: Option<PathBuf>,
    pub bind_address: Option<String>,
    pub log_level: Option<String>,
    pub json_logs: bool,
}

impl CliArgs {
    pub fn parse() -> Self {
        Self::from_matches(command().get_matches())
    }

    fn from_matches(matches: clap::ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG)),
            content_path: matches.get_one::<String>("content").map(PathBuf::from),
            bind_address: matches.get_one::<String>("bind").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}

const DEFAULT_CONFIG: &str = "realm.toml";

fn command() -> Command {
    Command::new("Realm Zone Server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Authoritative zone-sharded game server")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value(DEFAULT_CONFIG),
        )
        .arg(
            Arg::new("content")
                .long("content")
                .value_name("FILE")
                .help("Static content file (creature templates and spawns, JSON)"),
        )
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind")
                .value_name("ADDRESS")
                .help("Bind address (e.g., 0.0.0.0:7777)"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(ArgAction::SetTrue),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::from_matches(command().get_matches_from(args))
    }

    #[test]
    fn defaults_point_at_realm_toml() {
        let args = parse(&["realm"]);
        assert_eq!(args.config_path, PathBuf::from("realm.toml"));
        assert!(args.content_path.is_none());
        assert!(args.bind_address.is_none());
        assert!(!args.json_logs);
    }

    #[test]
    fn overrides_are_captured() {
        let args = parse(&[
            "realm",
            "-c",
            "prod.toml",
            "--content",
            "world.json",
            "--bind",
            "0.0.0.0:9000",
            "-l",
            "debug",
            "--json-logs",
        ]);
        assert_eq!(args.config_path, PathBuf::from("prod.toml"));
        assert_eq!(args.content_path, Some(PathBuf::from("world.json")));
        assert_eq!(args.bind_address.as_deref(), Some("0.0.0.0:9000"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
    }
}
