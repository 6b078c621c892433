//! SQLite backend implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Executor, Row, Sqlite};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::decode::{JsonColumns, bind_param, bind_value, is_json_declared, row_to_record};
use super::errors::map_sqlite_error;
use crate::config::SqliteConfig;
use crate::error::{StorageError, StorageResult};
use crate::migration::{AppliedMigration, HISTORY_TABLE, Migration};
use crate::storage::backend::lock::MigrationLock;
use crate::storage::backend::r#trait::StorageBackend;
use crate::storage::backend::sql::{self, QuestionMarks, Statement, validate_identifier};
use crate::storage::backend::types::{BackendKind, Record, SelectQuery};

const BACKEND: &str = "sqlite";

const CREATE_HISTORY: &str = "CREATE TABLE IF NOT EXISTS vigil_schema_history (
    version TEXT NOT NULL,
    name TEXT NOT NULL,
    checksum TEXT NOT NULL,
    applied_at TEXT NOT NULL,
    execution_time_ms INTEGER NOT NULL,
    backend_kind TEXT NOT NULL,
    PRIMARY KEY (version, backend_kind)
)";

/// SQLite backend implementation
///
/// `bulk_insert` runs in one local transaction, so a failing row leaves no
/// trace of the batch. Unlike the networked primary there is no window where
/// a commit may or may not have happened.
pub struct SqliteBackend {
    config: SqliteConfig,
    health_timeout: Duration,
    pool: RwLock<Option<SqlitePool>>,
    connect_lock: tokio::sync::Mutex<()>,
    /// JSON-declared columns per table, cleared after schema changes
    json_columns: DashMap<String, Arc<JsonColumns>>,
}

impl SqliteBackend {
    /// Create an unconnected backend
    pub fn new(config: SqliteConfig) -> Self {
        Self {
            config,
            health_timeout: Duration::from_secs(5),
            pool: RwLock::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
            json_columns: DashMap::new(),
        }
    }

    /// Set the bound for `health_check`
    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    /// Get the database path
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn pool(&self) -> StorageResult<SqlitePool> {
        self.pool
            .read()
            .as_ref()
            .filter(|pool| !pool.is_closed())
            .cloned()
            .ok_or_else(|| StorageError::unavailable(BACKEND, "not connected"))
    }

    /// Forget cached column declarations, e.g. after DDL
    pub fn invalidate_schema_cache(&self) {
        self.json_columns.clear();
    }

    async fn json_columns(&self, pool: &SqlitePool, table: &str) -> StorageResult<Arc<JsonColumns>> {
        if let Some(columns) = self.json_columns.get(table) {
            return Ok(columns.clone());
        }

        let rows = sqlx::query("SELECT name, type FROM pragma_table_info(?)")
            .bind(table)
            .fetch_all(pool)
            .await
            .map_err(|e| map_sqlite_error(e, "introspect columns"))?;

        let mut columns = JsonColumns::new();
        for row in &rows {
            let name: String = row
                .try_get("name")
                .map_err(|e| map_sqlite_error(e, "introspect columns"))?;
            let declared: String = row
                .try_get("type")
                .map_err(|e| map_sqlite_error(e, "introspect columns"))?;
            if is_json_declared(&declared) {
                columns.insert(name);
            }
        }

        let columns = Arc::new(columns);
        // Unknown tables are left to fail in the statement itself
        if !rows.is_empty() {
            self.json_columns.insert(table.to_string(), columns.clone());
        }
        Ok(columns)
    }

    async fn run(
        &self,
        executor: impl Executor<'_, Database = Sqlite>,
        statement: &Statement,
        json: &JsonColumns,
        operation: &str,
    ) -> StorageResult<u64> {
        let mut query = sqlx::query(&statement.sql);
        for param in &statement.params {
            query = bind_param(query, param, json);
        }
        let result = query
            .execute(executor)
            .await
            .map_err(|e| map_sqlite_error(e, operation))?;
        Ok(result.rows_affected())
    }

    fn migration_error(migration: &Migration, error: sqlx::Error) -> StorageError {
        match map_sqlite_error(error, "apply migration") {
            e @ StorageError::BackendUnavailable { .. } => e,
            other => StorageError::MigrationFailed {
                version: migration.version.clone(),
                name: migration.name.clone(),
                message: other.to_string(),
            },
        }
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn connect(&self) -> StorageResult<()> {
        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        let path = &self.config.path;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(self.config.busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(self.config.max_connections)
            .acquire_timeout(self.config.busy_timeout + Duration::from_secs(5))
            .connect_with(options)
            .await
            .map_err(|e| map_sqlite_error(e, "connect"))?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| map_sqlite_error(e, "connect"))?;

        *self.pool.write() = Some(pool);
        tracing::info!(backend = BACKEND, path = %path.display(), "connected");
        Ok(())
    }

    async fn disconnect(&self) -> StorageResult<()> {
        let pool = self.pool.write().take();
        if let Some(pool) = pool {
            pool.close().await;
            tracing::info!(backend = BACKEND, "disconnected");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.pool
            .read()
            .as_ref()
            .map(|pool| !pool.is_closed())
            .unwrap_or(false)
    }

    async fn health_check(&self) -> bool {
        let Ok(pool) = self.pool() else {
            return false;
        };
        let ping = sqlx::query("SELECT 1").execute(&pool);
        match tokio::time::timeout(self.health_timeout, ping).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!(backend = BACKEND, error = %e, "health check failed");
                false
            }
            Err(_) => {
                tracing::debug!(backend = BACKEND, timeout = ?self.health_timeout, "health check timed out");
                false
            }
        }
    }

    async fn insert(&self, table: &str, mut record: Record) -> StorageResult<String> {
        let id = record.ensure_identity()?;
        let statement = sql::insert(&QuestionMarks, table, &record)?;
        let pool = self.pool()?;
        let json = self.json_columns(&pool, table).await?;
        self.run(&pool, &statement, &json, "insert").await?;
        Ok(id)
    }

    async fn bulk_insert(&self, table: &str, records: Vec<Record>) -> StorageResult<Vec<String>> {
        validate_identifier(table)?;
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::with_capacity(records.len());
        let mut statements = Vec::with_capacity(records.len());
        for mut record in records {
            ids.push(record.ensure_identity()?);
            statements.push(sql::insert(&QuestionMarks, table, &record)?);
        }

        let pool = self.pool()?;
        let json = self.json_columns(&pool, table).await?;
        let mut tx = pool
            .begin()
            .await
            .map_err(|e| map_sqlite_error(e, "begin bulk_insert"))?;
        for (row, statement) in statements.iter().enumerate() {
            if let Err(e) = self.run(&mut *tx, statement, &json, "bulk_insert").await {
                tracing::warn!(backend = BACKEND, table, row, error = %e, "bulk insert rolled back");
                return Err(e);
            }
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlite_error(e, "commit bulk_insert"))?;

        tracing::debug!(backend = BACKEND, table, rows = ids.len(), "bulk insert committed");
        Ok(ids)
    }

    async fn select(&self, table: &str, query: &SelectQuery) -> StorageResult<Vec<Record>> {
        let statement = sql::select(&QuestionMarks, table, query)?;
        let pool = self.pool()?;
        let json = self.json_columns(&pool, table).await?;

        let mut q = sqlx::query(&statement.sql);
        for param in &statement.params {
            q = bind_param(q, param, &json);
        }
        let rows = q
            .fetch_all(&pool)
            .await
            .map_err(|e| map_sqlite_error(e, "select"))?;
        rows.iter().map(|row| row_to_record(row, &json)).collect()
    }

    async fn update(&self, table: &str, id: &str, patch: Record) -> StorageResult<bool> {
        let statement = sql::update(&QuestionMarks, table, id, &patch)?;
        let pool = self.pool()?;
        let json = self.json_columns(&pool, table).await?;
        Ok(self.run(&pool, &statement, &json, "update").await? > 0)
    }

    async fn delete(&self, table: &str, id: &str) -> StorageResult<bool> {
        let statement = sql::delete(&QuestionMarks, table, id)?;
        let pool = self.pool()?;
        Ok(self.run(&pool, &statement, &JsonColumns::new(), "delete").await? > 0)
    }

    async fn execute_raw(&self, sql: &str, params: &[Value]) -> StorageResult<Vec<Record>> {
        let pool = self.pool()?;
        let mut query = sqlx::query(sql);
        for value in params {
            query = bind_value(query, value);
        }
        let rows = query
            .fetch_all(&pool)
            .await
            .map_err(|e| map_sqlite_error(e, "execute_raw"))?;
        // Raw SQL may have changed the schema
        self.invalidate_schema_cache();
        // No table to consult, so text is returned verbatim
        let json = JsonColumns::new();
        rows.iter().map(|row| row_to_record(row, &json)).collect()
    }

    async fn ensure_history_table(&self) -> StorageResult<()> {
        let pool = self.pool()?;
        sqlx::raw_sql(CREATE_HISTORY)
            .execute(&pool)
            .await
            .map_err(|e| map_sqlite_error(e, "create history table"))?;
        Ok(())
    }

    async fn applied_migrations(&self) -> StorageResult<Vec<AppliedMigration>> {
        let pool = self.pool()?;
        let rows = sqlx::query(
            "SELECT version, name, checksum, applied_at, execution_time_ms \
             FROM vigil_schema_history WHERE backend_kind = ?",
        )
        .bind(BackendKind::Sqlite.as_str())
        .fetch_all(&pool)
        .await
        .map_err(|e| map_sqlite_error(e, "read migration history"))?;

        let mut applied = Vec::with_capacity(rows.len());
        for row in &rows {
            let read = |column: &str| -> StorageResult<String> {
                row.try_get::<String, _>(column)
                    .map_err(|e| map_sqlite_error(e, "read migration history"))
            };
            let applied_at = read("applied_at")?;
            let applied_at = DateTime::parse_from_rfc3339(&applied_at)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|e| {
                    StorageError::Serialization(format!(
                        "bad applied_at '{}' in migration history: {}",
                        applied_at, e
                    ))
                })?;
            let elapsed_ms: i64 = row
                .try_get("execution_time_ms")
                .map_err(|e| map_sqlite_error(e, "read migration history"))?;

            applied.push(AppliedMigration {
                version: read("version")?,
                name: read("name")?,
                checksum: read("checksum")?,
                applied_at,
                execution_time: Duration::from_millis(elapsed_ms.max(0) as u64),
                backend_kind: BackendKind::Sqlite,
            });
        }
        applied.sort_by(|a, b| Migration::compare_versions(&a.version, &b.version));
        Ok(applied)
    }

    async fn apply_migration(&self, migration: &Migration) -> StorageResult<AppliedMigration> {
        let pool = self.pool()?;
        let started = Instant::now();

        let mut tx = pool
            .begin()
            .await
            .map_err(|e| map_sqlite_error(e, "begin migration"))?;
        sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(&migration.content))
            .await
            .map_err(|e| Self::migration_error(migration, e))?;

        let execution_time = started.elapsed();
        let applied_at = Utc::now();
        sqlx::query(&format!(
            "INSERT INTO {} (version, name, checksum, applied_at, execution_time_ms, backend_kind) \
             VALUES (?, ?, ?, ?, ?, ?)",
            HISTORY_TABLE
        ))
        .bind(&migration.version)
        .bind(&migration.name)
        .bind(&migration.checksum)
        .bind(applied_at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true))
        .bind(execution_time.as_millis() as i64)
        .bind(BackendKind::Sqlite.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlite_error(e, "record migration"))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlite_error(e, "commit migration"))?;
        self.invalidate_schema_cache();

        Ok(AppliedMigration {
            version: migration.version.clone(),
            name: migration.name.clone(),
            checksum: migration.checksum.clone(),
            applied_at,
            execution_time,
            backend_kind: BackendKind::Sqlite,
        })
    }

    async fn acquire_migration_lock(&self, _key: &str) -> StorageResult<Option<MigrationLock>> {
        // No cross-process lock; the history primary key rejects a second writer
        Ok(None)
    }
}
