//! Logging configuration

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Output format for the log subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(StorageError::config(format!(
                "unknown log format '{}' (expected json, pretty or compact)",
                other
            ))),
        }
    }
}

/// Logging configuration
///
/// The library never installs a subscriber; binaries read this to build one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error, or `vigil_core=debug`)
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl LoggingConfig {
    /// Merge with another logging config
    pub fn merge(&mut self, other: LoggingConfig) {
        if !other.level.is_empty() {
            self.level = other.level;
        }
        self.format = other.format;
    }

    /// Overlay `VIGIL_LOG_LEVEL` and `VIGIL_LOG_FORMAT`
    pub fn apply_env<F>(&mut self, lookup: F) -> StorageResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("VIGIL_LOG_LEVEL") {
            self.level = level;
        }
        if let Some(format) = lookup("VIGIL_LOG_FORMAT") {
            self.format = format.parse()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Pretty);
    }

    #[test]
    fn test_logging_config_merge() {
        let mut config = LoggingConfig::default();
        config.merge(LoggingConfig {
            level: String::new(),
            format: LogFormat::Json,
        });
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_apply_env() {
        let mut config = LoggingConfig::default();
        config
            .apply_env(|key| match key {
                "VIGIL_LOG_LEVEL" => Some("vigil_core=debug".to_string()),
                "VIGIL_LOG_FORMAT" => Some("compact".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.level, "vigil_core=debug");
        assert_eq!(config.format, LogFormat::Compact);

        assert!(config
            .apply_env(|_| Some("xml".to_string()))
            .is_err());
    }
}
