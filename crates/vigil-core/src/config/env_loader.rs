//! Environment variable-based configuration loading
//!
//! Every loader takes a lookup function so tests can feed a plain map instead
//! of mutating the process environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::storage::{FallbackStrategy, PostgresConfig, StorageConfig};
use crate::error::{StorageError, StorageResult};
use crate::recovery::BackoffKind;

/// Read a variable from the process environment, treating empty values as unset
pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> StorageResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| StorageError::config(format!("Invalid {} value '{}'", key, value)))
}

fn parse_duration(key: &str, value: &str) -> StorageResult<Duration> {
    humantime::parse_duration(value.trim()).map_err(|e| {
        StorageError::config(format!("Invalid {} duration '{}': {}", key, value, e))
    })
}

fn parse_bool(key: &str, value: &str) -> StorageResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(StorageError::config(format!(
            "Invalid {} value '{}' (expected true or false)",
            key, value
        ))),
    }
}

/// Overlay `VIGIL_*` variables onto an existing config
pub fn apply_env<F>(config: &mut StorageConfig, lookup: F) -> StorageResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("VIGIL_PRIMARY_URL") {
        match config.postgres.as_mut() {
            Some(pg) => pg.url = url,
            None => config.postgres = Some(PostgresConfig::new(url)),
        }
    }

    if let Some(pg) = config.postgres.as_mut() {
        if let Some(v) = lookup("VIGIL_POOL_MIN") {
            pg.pool.min_connections = parse_number("VIGIL_POOL_MIN", &v)?;
        }
        if let Some(v) = lookup("VIGIL_POOL_MAX") {
            pg.pool.max_connections = parse_number("VIGIL_POOL_MAX", &v)?;
        }
    }

    if let Some(path) = lookup("VIGIL_FALLBACK_PATH") {
        config.sqlite.path = PathBuf::from(path);
    }

    if let Some(v) = lookup("VIGIL_RETRY_MAX_ATTEMPTS") {
        config.retry.max_attempts = parse_number("VIGIL_RETRY_MAX_ATTEMPTS", &v)?;
    }
    if let Some(v) = lookup("VIGIL_RETRY_BASE_DELAY") {
        config.retry.base_delay = parse_duration("VIGIL_RETRY_BASE_DELAY", &v)?;
    }
    if let Some(v) = lookup("VIGIL_RETRY_MAX_DELAY") {
        config.retry.max_delay = parse_duration("VIGIL_RETRY_MAX_DELAY", &v)?;
    }
    if let Some(v) = lookup("VIGIL_RETRY_BACKOFF") {
        config.retry.backoff = v.parse::<BackoffKind>().map_err(StorageError::config)?;
    }

    if let Some(v) = lookup("VIGIL_CIRCUIT_FAILURE_THRESHOLD") {
        config.circuit_breaker.failure_threshold =
            parse_number("VIGIL_CIRCUIT_FAILURE_THRESHOLD", &v)?;
    }
    if let Some(v) = lookup("VIGIL_CIRCUIT_RECOVERY_TIMEOUT") {
        config.circuit_breaker.recovery_timeout =
            parse_duration("VIGIL_CIRCUIT_RECOVERY_TIMEOUT", &v)?;
    }

    if let Some(v) = lookup("VIGIL_HEALTH_CHECK_INTERVAL") {
        config.health_check_interval = parse_duration("VIGIL_HEALTH_CHECK_INTERVAL", &v)?;
    }
    if let Some(v) = lookup("VIGIL_HEALTH_CHECK_TIMEOUT") {
        config.health_check_timeout = parse_duration("VIGIL_HEALTH_CHECK_TIMEOUT", &v)?;
    }
    if let Some(v) = lookup("VIGIL_OPERATION_TIMEOUT") {
        config.operation_timeout = parse_duration("VIGIL_OPERATION_TIMEOUT", &v)?;
    }

    if let Some(v) = lookup("VIGIL_FALLBACK_STRATEGY") {
        config.fallback_strategy = v.parse::<FallbackStrategy>()?;
    }

    if let Some(dir) = lookup("VIGIL_MIGRATIONS_DIR") {
        config.migrations.dir = Some(PathBuf::from(dir));
    }
    if let Some(v) = lookup("VIGIL_AUTO_MIGRATE") {
        config.migrations.auto_migrate = parse_bool("VIGIL_AUTO_MIGRATE", &v)?;
    }
    if let Some(v) = lookup("VIGIL_MIGRATION_TARGET") {
        config.migrations.target = Some(v.trim().to_string());
    }

    Ok(())
}

impl StorageConfig {
    /// Build a config from defaults plus `VIGIL_*` environment variables
    pub fn from_env() -> StorageResult<Self> {
        Self::from_lookup(env_lookup)
    }

    /// Build a config from defaults plus whatever `lookup` returns
    pub fn from_lookup<F>(lookup: F) -> StorageResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        apply_env(&mut config, lookup)?;
        config.validate()?;
        Ok(config)
    }
}
