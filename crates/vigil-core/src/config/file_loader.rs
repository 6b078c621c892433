//! File-based configuration loading

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::env_loader::{apply_env, env_lookup};
use super::logging::LoggingConfig;
use super::storage::StorageConfig;
use crate::error::{StorageError, StorageResult};

/// Everything a `vigil.toml` can hold
///
/// ```toml
/// [storage]
/// fallback_strategy = "auto-fallback"
/// operation_timeout = "10s"
///
/// [storage.postgres]
/// url = "postgresql://vigil@localhost/telemetry"
///
/// [logging]
/// level = "info"
/// format = "json"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl VigilConfig {
    /// Parse TOML text
    pub fn from_toml_str(text: &str) -> StorageResult<Self> {
        toml::from_str(text).map_err(|e| StorageError::config(format!("Invalid TOML: {}", e)))
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            StorageError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&text)
    }

    /// Load an optional file, overlay the process environment, then validate
    pub fn load(path: Option<&Path>) -> StorageResult<Self> {
        Self::load_with(path, env_lookup)
    }

    /// Same as [`VigilConfig::load`] with an explicit variable lookup
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> StorageResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        apply_env(&mut config.storage, &lookup)?;
        config.logging.apply_env(&lookup)?;
        config.storage.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FallbackStrategy, LogFormat};
    use std::io::Write;
    use std::time::Duration;

    const SAMPLE: &str = r#"
[storage]
fallback_strategy = "retry-then-fallback"
operation_timeout = "2s"

[storage.postgres]
url = "postgresql://vigil@localhost/telemetry"

[storage.postgres.pool]
max_connections = 4

[storage.sqlite]
path = "/tmp/vigil-test.db"

[storage.retry]
max_attempts = 4
base_delay = "50ms"

[storage.migrations]
dir = "migrations"
target = "002"

[logging]
format = "json"
"#;

    #[test]
    fn test_parse_toml() {
        let config = VigilConfig::from_toml_str(SAMPLE).unwrap();
        let storage = &config.storage;

        assert_eq!(storage.fallback_strategy, FallbackStrategy::RetryThenFallback);
        assert_eq!(storage.operation_timeout, Duration::from_secs(2));
        let pg = storage.postgres.as_ref().unwrap();
        assert_eq!(pg.pool.max_connections, 4);
        assert_eq!(pg.pool.min_connections, 1);
        assert_eq!(storage.retry.max_attempts, 4);
        assert_eq!(storage.retry.base_delay, Duration::from_millis(50));
        assert_eq!(storage.retry.max_delay, Duration::from_secs(5));
        assert_eq!(storage.migrations.target.as_deref(), Some("002"));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_file_then_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = VigilConfig::load_with(Some(file.path()), |key| match key {
            "VIGIL_OPERATION_TIMEOUT" => Some("4s".to_string()),
            "VIGIL_LOG_LEVEL" => Some("debug".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.storage.operation_timeout, Duration::from_secs(4));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_bad_toml_is_configuration_error() {
        let result = VigilConfig::from_toml_str("[storage\nnope");
        assert!(matches!(result, Err(StorageError::Configuration(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = VigilConfig::from_file("/definitely/not/here/vigil.toml");
        assert!(matches!(result, Err(StorageError::Configuration(_))));
    }
}
