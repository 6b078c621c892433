//! Vigil operator CLI
//!
//! Runs migrations and inspects storage health using the same configuration
//! surface as the library: an optional `vigil.toml`, `VIGIL_*` variables and
//! a `.env` file in the working directory.

mod args;
mod commands;
mod logging;

use clap::Parser;
use colored::*;
use std::process::ExitCode;
use vigil_core::{StorageError, VigilConfig};

use args::{Cli, Commands};

/// Exit code for a failed run, by root cause
fn exit_code(error: &anyhow::Error) -> u8 {
    match error
        .chain()
        .find_map(|e| e.downcast_ref::<StorageError>())
        .map(StorageError::root)
    {
        Some(StorageError::Configuration(_)) => 2,
        Some(StorageError::MigrationIntegrity(_)) => 3,
        Some(StorageError::MigrationFailed { .. }) => 4,
        Some(StorageError::NoAvailableBackend)
        | Some(StorageError::BackendUnavailable { .. })
        | Some(StorageError::CircuitOpen { .. }) => 5,
        _ => 1,
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = VigilConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.migrations_dir {
        config.storage.migrations.dir = Some(dir);
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format.into();
    }
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    logging::init(&config.logging);
    tracing::debug!(strategy = %config.storage.fallback_strategy, "configuration loaded");

    let storage = config.storage;
    match cli.command {
        Commands::Migrate { target } => commands::migrate(storage, target).await,
        Commands::Status => commands::status(storage).await,
        Commands::Verify => commands::verify(storage).await,
        Commands::History => commands::history(storage).await,
        Commands::Health { json } => commands::health(storage, json).await,
        Commands::Monitor { every } => commands::monitor(storage, every).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::from(exit_code(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_exit_codes_follow_root_cause() {
        let err = anyhow::Error::from(StorageError::config("bad"));
        assert_eq!(exit_code(&err), 2);

        let err = Err::<(), _>(StorageError::integrity("checksum mismatch"))
            .context("migration failed on sqlite")
            .unwrap_err();
        assert_eq!(exit_code(&err), 3);

        let err = anyhow::Error::from(
            StorageError::NoAvailableBackend.with_context("insert", "tool_events"),
        );
        assert_eq!(exit_code(&err), 5);

        assert_eq!(exit_code(&anyhow::anyhow!("other")), 1);
    }
}
