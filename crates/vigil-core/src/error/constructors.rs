//! Convenience constructors for StorageError

use super::types::StorageError;
use std::time::Duration;

impl StorageError {
    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a new validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a new backend-unavailable error
    pub fn unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Create a new terminal backend error
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Create a new constraint violation
    pub fn constraint(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Constraint {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Create a new unknown-outcome error
    pub fn unknown_outcome(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnknownOutcome {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout(backend: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            backend: backend.into(),
            timeout,
        }
    }

    /// Create a new circuit-open error
    pub fn circuit_open(backend: impl Into<String>) -> Self {
        Self::CircuitOpen {
            backend: backend.into(),
        }
    }

    /// Create a new migration integrity error
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::MigrationIntegrity(message.into())
    }

    /// Wrap with the operation and table that produced the error
    pub fn with_context(self, operation: impl Into<String>, table: impl Into<String>) -> Self {
        if matches!(self, Self::Context { .. }) {
            return self;
        }
        Self::Context {
            operation: operation.into(),
            table: table.into(),
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_wraps_once() {
        let err = StorageError::unavailable("postgres", "connection refused")
            .with_context("insert", "sessions")
            .with_context("insert", "ignored");

        assert_eq!(
            err.to_string(),
            "insert on 'sessions' failed: Backend unavailable (postgres): connection refused"
        );
        assert!(matches!(err.root(), StorageError::BackendUnavailable { .. }));
        assert_eq!(err.backend_name(), Some("postgres"));
    }

    #[test]
    fn test_no_backend_detection() {
        assert!(StorageError::NoAvailableBackend.is_no_backend());
        assert!(
            StorageError::NoAvailableBackend
                .with_context("select", "prompts")
                .is_no_backend()
        );
        assert!(!StorageError::validation("bad").is_no_backend());
    }

    #[test]
    fn test_serde_json_conversion() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: StorageError = parse.unwrap_err().into();
        assert!(matches!(err, StorageError::Serialization(_)));
    }
}
