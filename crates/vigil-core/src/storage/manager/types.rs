//! Storage manager types

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::recovery::CircuitState;
use crate::storage::backend::BackendKind;

/// Which slot a backend occupies in the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendRole {
    Primary,
    Fallback,
}

impl BackendRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for BackendRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health status, used both for the manager and for each backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    /// Serving from the designated backend
    #[default]
    Healthy,
    /// Serving from the fallback while the primary is out
    Degraded,
    /// Nothing usable
    Failed,
}

impl BackendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What caused a health evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthTrigger {
    /// Backend selection at construction
    Startup,
    /// The interval monitor
    Proactive,
    /// An operation exhausted its attempts
    Reactive,
    /// Explicit `check_health` call
    Manual,
    Shutdown,
}

impl HealthTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Proactive => "proactive",
            Self::Reactive => "reactive",
            Self::Manual => "manual",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Health bookkeeping for one backend role
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackendHealth {
    pub status: BackendStatus,
    /// Last time a health check ran against this backend
    pub last_checked: Option<DateTime<Utc>>,
    /// Failed health checks and backend faults since the last success
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl BackendHealth {
    pub(crate) fn record_success(&mut self) {
        self.status = BackendStatus::Healthy;
        self.consecutive_failures = 0;
    }

    pub(crate) fn record_failure(&mut self, error: impl Into<String>) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error.into());
        if self.status == BackendStatus::Healthy {
            self.status = BackendStatus::Degraded;
        }
    }

    pub(crate) fn record_check(&mut self, passed: bool, error: Option<String>) {
        self.last_checked = Some(Utc::now());
        if passed {
            self.record_success();
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.status = BackendStatus::Failed;
            if error.is_some() {
                self.last_error = error;
            }
        }
    }
}

/// Storage statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageStats {
    pub status: BackendStatus,
    pub active_backend: Option<BackendKind>,
    /// When the current status was entered
    pub status_since: Option<DateTime<Utc>>,
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    /// Extra attempts made after a transient failure
    pub retries: u64,
    /// Switches away from the active backend
    pub failovers: u64,
    /// Switches back to the primary
    pub recoveries: u64,
    pub circuit_rejections: u64,
    pub last_error: Option<String>,
}

impl StorageStats {
    /// Success rate over all completed operations
    pub fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            return 1.0;
        }
        self.successful_operations as f64 / self.total_operations as f64
    }
}

/// Circuit state for one backend role
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub role: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub rejected_calls: u64,
}

/// Point-in-time view of the manager
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: BackendStatus,
    pub backend_kind: Option<BackendKind>,
    pub active_role: Option<BackendRole>,
    /// True only when serving from the designated backend
    pub healthy: bool,
    pub primary: Option<BackendHealth>,
    pub fallback: Option<BackendHealth>,
    pub circuits: Vec<CircuitSnapshot>,
    pub stats: StorageStats,
    pub checked_at: DateTime<Utc>,
}
