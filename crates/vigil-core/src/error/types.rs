//! Storage error enum

use std::time::Duration;
use thiserror::Error;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Main error type for the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Invalid or inconsistent configuration; prevents startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Backend could not be reached (network, pool exhaustion, busy file)
    #[error("Backend unavailable ({backend}): {message}")]
    BackendUnavailable { backend: String, message: String },

    /// Backend rejected the call for a reason retries cannot fix (auth, permission)
    #[error("Backend error ({backend}): {message}")]
    Backend { backend: String, message: String },

    /// Caller supplied malformed input (identifier, record shape, unknown table)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Data-integrity violation reported by the backend (unique, foreign key, not null)
    #[error("Constraint violation ({backend}): {message}")]
    Constraint { backend: String, message: String },

    /// The backend may or may not have applied the write (commit interrupted)
    #[error("Unknown outcome ({backend}): {message}")]
    UnknownOutcome { backend: String, message: String },

    /// A backend call exceeded its deadline
    #[error("Operation timed out after {timeout:?} ({backend})")]
    Timeout { backend: String, timeout: Duration },

    /// Applied migration changed on disk, or the history is inconsistent
    #[error("Migration integrity error: {0}")]
    MigrationIntegrity(String),

    /// A migration script failed and was rolled back
    #[error("Migration {version} ({name}) failed: {message}")]
    MigrationFailed {
        version: String,
        name: String,
        message: String,
    },

    /// Circuit breaker rejected the call without touching the backend
    #[error("Circuit breaker open for backend: {backend}")]
    CircuitOpen { backend: String },

    /// Neither backend is usable
    #[error("No storage backend available")]
    NoAvailableBackend,

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Any of the above, annotated with the operation and table it came from
    #[error("{operation} on '{table}' failed: {source}")]
    Context {
        operation: String,
        table: String,
        #[source]
        source: Box<StorageError>,
    },
}

impl From<serde_json::Error> for StorageError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl StorageError {
    /// Strip any `Context` wrappers and return the underlying error
    pub fn root(&self) -> &StorageError {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Name of the backend the error came from, if known
    pub fn backend_name(&self) -> Option<&str> {
        match self.root() {
            Self::BackendUnavailable { backend, .. }
            | Self::Backend { backend, .. }
            | Self::Constraint { backend, .. }
            | Self::UnknownOutcome { backend, .. }
            | Self::Timeout { backend, .. }
            | Self::CircuitOpen { backend } => Some(backend),
            _ => None,
        }
    }

    /// Whether the caller should treat this as "telemetry dropped, continue"
    pub fn is_no_backend(&self) -> bool {
        matches!(self.root(), Self::NoAvailableBackend)
    }
}
