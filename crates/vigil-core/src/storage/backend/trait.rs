//! Storage backend trait definition
//!
//! Both clients implement this contract; the manager and the migration
//! runner only ever talk to `dyn StorageBackend`.

use async_trait::async_trait;
use serde_json::Value;

use super::lock::MigrationLock;
use super::types::{BackendKind, Record, SelectQuery};
use crate::error::StorageResult;
use crate::migration::{AppliedMigration, Migration};

/// Storage backend trait
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Engine behind this backend
    fn kind(&self) -> BackendKind;

    /// Open the pool; a no-op when already connected
    async fn connect(&self) -> StorageResult<()>;

    /// Release the pool; safe to call repeatedly
    async fn disconnect(&self) -> StorageResult<()>;

    fn is_connected(&self) -> bool;

    /// Cheap liveness check, bounded by the health timeout
    ///
    /// Never errors: any failure is reported as `false`.
    async fn health_check(&self) -> bool;

    /// Insert one record and return its id
    async fn insert(&self, table: &str, record: Record) -> StorageResult<String>;

    /// Insert all records in one transaction and return their ids
    async fn bulk_insert(&self, table: &str, records: Vec<Record>) -> StorageResult<Vec<String>>;

    async fn select(&self, table: &str, query: &SelectQuery) -> StorageResult<Vec<Record>>;

    /// Apply `patch` to the record with `id`; true if a row changed
    async fn update(&self, table: &str, id: &str, patch: Record) -> StorageResult<bool>;

    /// Delete the record with `id`; true if a row was removed
    async fn delete(&self, table: &str, id: &str) -> StorageResult<bool>;

    /// Run caller-provided SQL with bound parameters
    async fn execute_raw(&self, sql: &str, params: &[Value]) -> StorageResult<Vec<Record>>;

    /// Create the migration history table if needed
    async fn ensure_history_table(&self) -> StorageResult<()>;

    /// History rows for this backend kind, ordered by version
    async fn applied_migrations(&self) -> StorageResult<Vec<AppliedMigration>>;

    /// Run the script and record it in history, atomically
    async fn apply_migration(&self, migration: &Migration) -> StorageResult<AppliedMigration>;

    /// Take the engine's cross-process migration lock, if it has one
    async fn acquire_migration_lock(&self, key: &str) -> StorageResult<Option<MigrationLock>>;
}
