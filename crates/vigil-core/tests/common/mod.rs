//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

use vigil_core::config::SqliteConfig;
use vigil_core::storage::{
    BackendKind, MigrationLock, Record, SelectQuery, SqliteBackend, StorageBackend,
};
use vigil_core::{AppliedMigration, Migration, StorageError, StorageResult};

/// SQLite backend that can be taken offline or slowed down
pub struct Switchable {
    inner: SqliteBackend,
    up: AtomicBool,
    delay: Mutex<Duration>,
    data_calls: AtomicU32,
}

impl Switchable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: SqliteBackend::new(SqliteConfig::new(path)),
            up: AtomicBool::new(true),
            delay: Mutex::new(Duration::ZERO),
            data_calls: AtomicU32::new(0),
        }
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Number of data operations that reached this backend
    pub fn data_calls(&self) -> u32 {
        self.data_calls.load(Ordering::SeqCst)
    }

    fn check_up(&self) -> StorageResult<()> {
        if self.up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::unavailable("sqlite", "simulated outage"))
        }
    }

    async fn gate(&self) -> StorageResult<()> {
        self.data_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.check_up()
    }
}

#[async_trait]
impl StorageBackend for Switchable {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    async fn connect(&self) -> StorageResult<()> {
        self.check_up()?;
        self.inner.connect().await
    }

    async fn disconnect(&self) -> StorageResult<()> {
        self.inner.disconnect().await
    }

    fn is_connected(&self) -> bool {
        self.up.load(Ordering::SeqCst) && self.inner.is_connected()
    }

    async fn health_check(&self) -> bool {
        self.up.load(Ordering::SeqCst) && self.inner.health_check().await
    }

    async fn insert(&self, table: &str, record: Record) -> StorageResult<String> {
        self.gate().await?;
        self.inner.insert(table, record).await
    }

    async fn bulk_insert(&self, table: &str, records: Vec<Record>) -> StorageResult<Vec<String>> {
        self.gate().await?;
        self.inner.bulk_insert(table, records).await
    }

    async fn select(&self, table: &str, query: &SelectQuery) -> StorageResult<Vec<Record>> {
        self.gate().await?;
        self.inner.select(table, query).await
    }

    async fn update(&self, table: &str, id: &str, patch: Record) -> StorageResult<bool> {
        self.gate().await?;
        self.inner.update(table, id, patch).await
    }

    async fn delete(&self, table: &str, id: &str) -> StorageResult<bool> {
        self.gate().await?;
        self.inner.delete(table, id).await
    }

    async fn execute_raw(&self, sql: &str, params: &[Value]) -> StorageResult<Vec<Record>> {
        self.gate().await?;
        self.inner.execute_raw(sql, params).await
    }

    async fn ensure_history_table(&self) -> StorageResult<()> {
        self.check_up()?;
        self.inner.ensure_history_table().await
    }

    async fn applied_migrations(&self) -> StorageResult<Vec<AppliedMigration>> {
        self.check_up()?;
        self.inner.applied_migrations().await
    }

    async fn apply_migration(&self, migration: &Migration) -> StorageResult<AppliedMigration> {
        self.check_up()?;
        self.inner.apply_migration(migration).await
    }

    async fn acquire_migration_lock(&self, key: &str) -> StorageResult<Option<MigrationLock>> {
        self.inner.acquire_migration_lock(key).await
    }
}

/// Route library logs to the test output; silent unless `RUST_LOG` is set
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The migration trees shipped with the repository
pub fn shipped_migrations() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations")
}

/// Write `files` into `<root>/sqlite/`
pub fn write_sqlite_tree(root: &Path, files: &[(&str, &str)]) {
    let dir = root.join("sqlite");
    std::fs::create_dir_all(&dir).unwrap();
    for (name, content) in files {
        std::fs::write(dir.join(name), content).unwrap();
    }
}

/// Fresh connected SQLite backend in `dir`
pub async fn sqlite_at(dir: &TempDir, file: &str) -> SqliteBackend {
    let backend = SqliteBackend::new(SqliteConfig::new(dir.path().join(file)));
    backend.connect().await.unwrap();
    backend
}

pub fn tool_event(tool: &str, duration_ms: i64) -> Record {
    Record::new()
        .with("tool", tool)
        .with("session_id", "sess-1")
        .with("duration_ms", duration_ms)
        .with("success", true)
        .with("payload", serde_json::json!({ "args": ["-n", "TODO"] }))
}
