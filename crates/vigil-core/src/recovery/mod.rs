//! Error recovery for backend calls
//!
//! This module provides:
//! - Error classification (transient vs permanent vs fail-fast)
//! - Backoff strategies and the retry policy
//! - Circuit breakers scoped per backend

pub mod backoff;
pub mod circuit_breaker;
pub mod retry;

pub use backoff::{BackoffKind, BackoffStrategy, ConstantBackoff, ExponentialBackoff, LinearBackoff};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStats, CircuitState,
};
pub use retry::{RetryConfig, RetryPolicy, RetryResult};

use crate::error::StorageError;

/// Error classification for recovery decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Infrastructure fault that may succeed on retry
    Transient,
    /// Fault that will not succeed on retry; propagates immediately
    Permanent,
    /// Rejected before reaching a backend; consumes no attempt
    FailFast,
}

/// Classify a storage error
pub fn classify_error(error: &StorageError) -> ErrorClass {
    match error.root() {
        StorageError::BackendUnavailable { .. } | StorageError::Timeout { .. } => {
            ErrorClass::Transient
        }
        StorageError::CircuitOpen { .. } => ErrorClass::FailFast,
        StorageError::Io(io) => match io.kind() {
            std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::NotFound => {
                ErrorClass::Permanent
            }
            _ => ErrorClass::Transient,
        },
        StorageError::Backend { .. }
        | StorageError::UnknownOutcome { .. }
        | StorageError::Validation(_)
        | StorageError::Constraint { .. }
        | StorageError::Serialization(_)
        | StorageError::Configuration(_)
        | StorageError::MigrationIntegrity(_)
        | StorageError::MigrationFailed { .. }
        | StorageError::NoAvailableBackend => ErrorClass::Permanent,
        // root() never returns a Context
        StorageError::Context { .. } => ErrorClass::Permanent,
    }
}

/// Whether the error says the backend itself is unusable
///
/// Retryable faults trigger failover only once retries are exhausted; the
/// terminal backend faults listed here trigger it immediately.
pub fn is_backend_fault(error: &StorageError) -> bool {
    matches!(
        error.root(),
        StorageError::BackendUnavailable { .. }
            | StorageError::Timeout { .. }
            | StorageError::Backend { .. }
            | StorageError::UnknownOutcome { .. }
    ) || matches!(classify_error(error), ErrorClass::Transient)
}

/// Whether the error should count against the backend's circuit breaker
pub fn counts_against_circuit(error: &StorageError) -> bool {
    is_backend_fault(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_classify_infrastructure_errors() {
        assert_eq!(
            classify_error(&StorageError::unavailable("postgres", "connection refused")),
            ErrorClass::Transient
        );
        assert_eq!(
            classify_error(&StorageError::timeout("postgres", Duration::from_secs(1))),
            ErrorClass::Transient
        );
        assert_eq!(
            classify_error(&StorageError::backend("postgres", "password authentication failed")),
            ErrorClass::Permanent
        );
    }

    #[test]
    fn test_classify_caller_errors() {
        assert_eq!(
            classify_error(&StorageError::validation("bad table name")),
            ErrorClass::Permanent
        );
        assert_eq!(
            classify_error(&StorageError::constraint("sqlite", "UNIQUE constraint failed")),
            ErrorClass::Permanent
        );
        assert!(!is_backend_fault(&StorageError::validation("bad")));
        assert!(!counts_against_circuit(&StorageError::constraint("sqlite", "dup")));
    }

    #[test]
    fn test_classify_through_context() {
        let err = StorageError::unavailable("sqlite", "database is locked")
            .with_context("insert", "tool_events");
        assert_eq!(classify_error(&err), ErrorClass::Transient);
        assert!(is_backend_fault(&err));
    }

    #[test]
    fn test_fail_fast_errors() {
        assert_eq!(
            classify_error(&StorageError::circuit_open("postgres")),
            ErrorClass::FailFast
        );
        assert!(!is_backend_fault(&StorageError::circuit_open("postgres")));
        assert!(is_backend_fault(&StorageError::backend("postgres", "permission denied")));
    }
}
