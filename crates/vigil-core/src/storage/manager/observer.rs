//! Hooks for metrics sinks

use std::time::Duration;

use super::types::{BackendRole, BackendStatus, HealthTrigger};
use crate::error::StorageError;
use crate::storage::backend::BackendKind;

/// A finished manager operation
#[derive(Debug)]
pub struct OperationEvent<'a> {
    pub operation: &'a str,
    pub table: &'a str,
    /// Backend that served the final attempt, if any
    pub backend: Option<BackendKind>,
    pub elapsed: Duration,
    pub error: Option<&'a StorageError>,
}

/// A change of active backend or status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: BackendStatus,
    pub to: BackendStatus,
    pub backend: Option<BackendKind>,
    pub trigger: HealthTrigger,
}

/// Receives manager events
///
/// Injected at construction. Every method has an empty default so sinks only
/// implement what they record. Called inline on the operation path, so
/// implementations must not block.
pub trait StorageObserver: Send + Sync {
    fn on_operation(&self, _event: &OperationEvent<'_>) {}

    /// A transient failure is about to be retried; `attempt` is the one that failed (1-based)
    fn on_retry(&self, _role: BackendRole, _attempt: u32, _error: &StorageError) {}

    fn on_circuit_rejected(&self, _role: BackendRole) {}

    fn on_transition(&self, _transition: &Transition) {}
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl StorageObserver for NoopObserver {}
