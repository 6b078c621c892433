//! CLI argument definitions using clap
//!
//! - vigil migrate [--target V]   # apply pending migrations to the active backend
//! - vigil status                 # per-version migration state
//! - vigil verify                 # check applied checksums only
//! - vigil history                # applied migrations
//! - vigil health [--json]        # one health evaluation
//! - vigil monitor                # print health until interrupted

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use vigil_core::config::LogFormat;

#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(about = "Vigil - resilient telemetry storage")]
#[command(version)]
pub struct Cli {
    /// Path to a vigil.toml configuration file
    #[arg(long, short, env = "VIGIL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Migration root, overriding configuration
    #[arg(long, global = true)]
    pub migrations_dir: Option<PathBuf>,

    /// Log format, overriding configuration
    #[arg(long, value_enum, global = true)]
    pub log_format: Option<LogFormatArg>,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply pending migrations to the active backend
    Migrate {
        /// Stop after this version (inclusive)
        #[arg(long)]
        target: Option<String>,
    },

    /// Show applied, pending, modified and missing migrations
    Status,

    /// Verify applied migrations against the scripts on disk
    Verify,

    /// List applied migrations
    History,

    /// Evaluate backend health once
    Health {
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Keep the manager running and print health periodically
    Monitor {
        /// How often to print, e.g. "10s"
        #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
        every: Duration,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormatArg {
    Json,
    Pretty,
    Compact,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Compact => LogFormat::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_migrate_with_target() {
        let cli = Cli::parse_from(["vigil", "migrate", "--target", "002"]);
        match cli.command {
            Commands::Migrate { target } => assert_eq!(target.as_deref(), Some("002")),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "vigil",
            "health",
            "--json",
            "--log-format",
            "json",
            "--migrations-dir",
            "db/migrations",
        ]);
        assert_eq!(cli.log_format, Some(LogFormatArg::Json));
        assert_eq!(cli.migrations_dir, Some(PathBuf::from("db/migrations")));
        assert!(matches!(cli.command, Commands::Health { json: true }));
    }

    #[test]
    fn test_parse_monitor_interval() {
        let cli = Cli::parse_from(["vigil", "monitor", "--every", "2s"]);
        assert!(matches!(
            cli.command,
            Commands::Monitor { every } if every == Duration::from_secs(2)
        ));
    }
}
