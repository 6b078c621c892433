//! Migration types

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::path::PathBuf;
use std::time::Duration;

use crate::storage::BackendKind;

/// Name of the table recording applied migrations
pub const HISTORY_TABLE: &str = "vigil_schema_history";

/// A migration script discovered on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Digit-only version token, e.g. `003` or `20240501120000`
    pub version: String,
    /// Description taken from the file name
    pub name: String,
    /// Script text
    pub content: String,
    /// Lowercase hex SHA-256 of `content`
    pub checksum: String,
    pub path: PathBuf,
}

impl Migration {
    /// Numeric order of two version tokens, independent of zero padding
    pub fn compare_versions(a: &str, b: &str) -> Ordering {
        let a = a.trim_start_matches('0');
        let b = b.trim_start_matches('0');
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    }
}

/// A row of the history table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    pub version: String,
    pub name: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub execution_time: Duration,
    pub backend_kind: BackendKind,
}

/// Where a version stands for one backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    /// Applied and the file on disk still matches
    Applied,
    /// Applied but the file on disk changed since
    Modified,
    /// Applied but the file is gone
    Missing,
    /// On disk, not yet applied
    Pending,
}

/// One line of `MigrationManager::status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub version: String,
    pub name: String,
    pub state: MigrationState,
    pub applied_at: Option<DateTime<Utc>>,
}

/// Outcome of a `migrate` run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Versions applied by this run, in order
    pub applied: Vec<AppliedMigration>,
    /// Versions already in history before the run
    pub already_applied: usize,
    /// Versions left pending because of a target
    pub skipped: Vec<String>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}
