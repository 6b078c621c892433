//! PostgreSQL backend implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Executor, Postgres, Row};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::decode::{ColumnTypes, TypedPlaceholders, bind_native, bind_typed, row_to_record};
use super::errors::{map_commit_error, map_pg_error};
use crate::config::PostgresConfig;
use crate::error::{StorageError, StorageResult};
use crate::migration::{AppliedMigration, HISTORY_TABLE, Migration};
use crate::storage::backend::lock::{MigrationLock, advisory_key};
use crate::storage::backend::r#trait::StorageBackend;
use crate::storage::backend::sql::{self, Statement, validate_identifier};
use crate::storage::backend::types::{BackendKind, Record, SelectQuery};

const BACKEND: &str = "postgres";

const CREATE_HISTORY: &str = "CREATE TABLE IF NOT EXISTS vigil_schema_history (
    version TEXT NOT NULL,
    name TEXT NOT NULL,
    checksum TEXT NOT NULL,
    applied_at TIMESTAMPTZ NOT NULL,
    execution_time_ms BIGINT NOT NULL,
    backend_kind TEXT NOT NULL,
    PRIMARY KEY (version, backend_kind)
)";

/// PostgreSQL backend implementation
pub struct PostgresBackend {
    config: PostgresConfig,
    health_timeout: Duration,
    pool: RwLock<Option<PgPool>>,
    connect_lock: tokio::sync::Mutex<()>,
    /// Column types per table, cleared after schema changes
    column_cache: DashMap<String, Arc<ColumnTypes>>,
}

impl PostgresBackend {
    /// Create an unconnected backend
    pub fn new(config: PostgresConfig) -> Self {
        Self {
            config,
            health_timeout: Duration::from_secs(5),
            pool: RwLock::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
            column_cache: DashMap::new(),
        }
    }

    /// Set the bound for `health_check`
    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    pub fn config(&self) -> &PostgresConfig {
        &self.config
    }

    /// Forget cached column types, e.g. after DDL
    pub fn invalidate_schema_cache(&self) {
        self.column_cache.clear();
    }

    fn pool(&self) -> StorageResult<PgPool> {
        self.pool
            .read()
            .as_ref()
            .filter(|pool| !pool.is_closed())
            .cloned()
            .ok_or_else(|| StorageError::unavailable(BACKEND, "not connected"))
    }

    async fn column_types(&self, pool: &PgPool, table: &str) -> StorageResult<Arc<ColumnTypes>> {
        if let Some(types) = self.column_cache.get(table) {
            return Ok(types.clone());
        }

        let rows = sqlx::query(
            "SELECT column_name::text AS column_name, udt_name::text AS udt_name \
             FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1",
        )
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(|e| map_pg_error(e, "introspect columns"))?;

        if rows.is_empty() {
            return Err(StorageError::validation(format!("unknown table '{}'", table)));
        }

        let mut types = ColumnTypes::with_capacity(rows.len());
        for row in rows {
            let column: String = row
                .try_get("column_name")
                .map_err(|e| map_pg_error(e, "introspect columns"))?;
            let udt: String = row
                .try_get("udt_name")
                .map_err(|e| map_pg_error(e, "introspect columns"))?;
            types.insert(column, udt);
        }

        let types = Arc::new(types);
        self.column_cache.insert(table.to_string(), types.clone());
        tracing::debug!(backend = BACKEND, table, columns = types.len(), "cached column types");
        Ok(types)
    }

    fn check_columns<'a>(
        table: &str,
        types: &ColumnTypes,
        columns: impl IntoIterator<Item = &'a str>,
    ) -> StorageResult<()> {
        for column in columns {
            if !types.contains_key(column) {
                return Err(StorageError::validation(format!(
                    "unknown column '{}' in table '{}'",
                    column, table
                )));
            }
        }
        Ok(())
    }

    fn prepare_insert(
        table: &str,
        types: &ColumnTypes,
        record: &mut Record,
    ) -> StorageResult<Statement> {
        record.ensure_identity()?;
        Self::check_columns(table, types, record.field_names())?;
        sql::insert(&TypedPlaceholders { types }, table, record)
    }

    async fn run(
        &self,
        executor: impl Executor<'_, Database = Postgres>,
        statement: &Statement,
        types: &ColumnTypes,
        operation: &str,
    ) -> StorageResult<u64> {
        let mut query = sqlx::query(&statement.sql);
        for param in &statement.params {
            query = bind_typed(query, param, types);
        }
        let result = query
            .execute(executor)
            .await
            .map_err(|e| map_pg_error(e, operation))?;
        Ok(result.rows_affected())
    }

    fn migration_error(migration: &Migration, error: sqlx::Error) -> StorageError {
        match map_pg_error(error, "apply migration") {
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
impl StorageBackend for PostgresBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    async fn connect(&self) -> StorageResult<()> {
        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        let pool_config = &self.config.pool;
        let options = PgPoolOptions::new()
            .min_connections(pool_config.min_connections)
            .max_connections(pool_config.max_connections)
            .acquire_timeout(pool_config.acquire_timeout)
            .idle_timeout(Some(pool_config.idle_timeout))
            .max_lifetime(Some(pool_config.max_lifetime));

        tracing::info!(backend = BACKEND, url = %self.config.redacted_url(), "connecting");

        let connect = options.connect(&self.config.url);
        let pool = tokio::time::timeout(pool_config.acquire_timeout, connect)
            .await
            .map_err(|_| StorageError::timeout(BACKEND, pool_config.acquire_timeout))?
            .map_err(|e| map_pg_error(e, "connect"))?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| map_pg_error(e, "connect"))?;

        *self.pool.write() = Some(pool);
        tracing::info!(backend = BACKEND, "connected");
        Ok(())
    }

    async fn disconnect(&self) -> StorageResult<()> {
        let pool = self.pool.write().take();
        if let Some(pool) = pool {
            pool.close().await;
            tracing::info!(backend = BACKEND, "disconnected");
        }
        self.column_cache.clear();
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
        validate_identifier(table)?;
        let pool = self.pool()?;
        let types = self.column_types(&pool, table).await?;
        let statement = Self::prepare_insert(table, &types, &mut record)?;
        let id = record.id().unwrap_or_default().to_string();

        self.run(&pool, &statement, &types, "insert").await?;
        Ok(id)
    }

    async fn bulk_insert(&self, table: &str, records: Vec<Record>) -> StorageResult<Vec<String>> {
        validate_identifier(table)?;
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let pool = self.pool()?;
        let types = self.column_types(&pool, table).await?;

        let mut ids = Vec::with_capacity(records.len());
        let mut statements = Vec::with_capacity(records.len());
        for mut record in records {
            statements.push(Self::prepare_insert(table, &types, &mut record)?);
            ids.push(record.id().unwrap_or_default().to_string());
        }

        let mut tx = pool
            .begin()
            .await
            .map_err(|e| map_pg_error(e, "begin bulk_insert"))?;
        for (row, statement) in statements.iter().enumerate() {
            if let Err(e) = self.run(&mut *tx, statement, &types, "bulk_insert").await {
                tracing::warn!(backend = BACKEND, table, row, error = %e, "bulk insert rolled back");
                return Err(e);
            }
        }
        tx.commit()
            .await
            .map_err(|e| map_commit_error(e, "bulk_insert"))?;

        tracing::debug!(backend = BACKEND, table, rows = ids.len(), "bulk insert committed");
        Ok(ids)
    }

    async fn select(&self, table: &str, query: &SelectQuery) -> StorageResult<Vec<Record>> {
        validate_identifier(table)?;
        let pool = self.pool()?;
        let types = self.column_types(&pool, table).await?;
        Self::check_columns(
            table,
            &types,
            query
                .filters
                .keys()
                .map(String::as_str)
                .chain(std::iter::once(query.ordering().0)),
        )?;

        let statement = sql::select(&TypedPlaceholders { types: &types }, table, query)?;
        let mut q = sqlx::query(&statement.sql);
        for param in &statement.params {
            q = bind_typed(q, param, &types);
        }
        let rows = q
            .fetch_all(&pool)
            .await
            .map_err(|e| map_pg_error(e, "select"))?;
        rows.iter().map(row_to_record).collect()
    }

    async fn update(&self, table: &str, id: &str, patch: Record) -> StorageResult<bool> {
        validate_identifier(table)?;
        let pool = self.pool()?;
        let types = self.column_types(&pool, table).await?;
        Self::check_columns(table, &types, patch.field_names())?;

        let statement = sql::update(&TypedPlaceholders { types: &types }, table, id, &patch)?;
        Ok(self.run(&pool, &statement, &types, "update").await? > 0)
    }

    async fn delete(&self, table: &str, id: &str) -> StorageResult<bool> {
        validate_identifier(table)?;
        let pool = self.pool()?;
        let types = self.column_types(&pool, table).await?;

        let statement = sql::delete(&TypedPlaceholders { types: &types }, table, id)?;
        Ok(self.run(&pool, &statement, &types, "delete").await? > 0)
    }

    async fn execute_raw(&self, sql: &str, params: &[Value]) -> StorageResult<Vec<Record>> {
        let pool = self.pool()?;
        let mut query = sqlx::query(sql);
        for value in params {
            query = bind_native(query, value);
        }
        let rows = query
            .fetch_all(&pool)
            .await
            .map_err(|e| map_pg_error(e, "execute_raw"))?;

        let head = sql.trim_start().to_ascii_uppercase();
        if ["CREATE", "ALTER", "DROP"].iter().any(|kw| head.starts_with(kw)) {
            self.invalidate_schema_cache();
        }
        rows.iter().map(row_to_record).collect()
    }

    async fn ensure_history_table(&self) -> StorageResult<()> {
        let pool = self.pool()?;
        sqlx::raw_sql(CREATE_HISTORY)
            .execute(&pool)
            .await
            .map_err(|e| map_pg_error(e, "create history table"))?;
        Ok(())
    }

    async fn applied_migrations(&self) -> StorageResult<Vec<AppliedMigration>> {
        let pool = self.pool()?;
        let rows = sqlx::query(
            "SELECT version, name, checksum, applied_at, execution_time_ms \
             FROM vigil_schema_history WHERE backend_kind = $1",
        )
        .bind(BackendKind::Postgres.as_str())
        .fetch_all(&pool)
        .await
        .map_err(|e| map_pg_error(e, "read migration history"))?;

        let mut applied = rows
            .iter()
            .map(|row| -> Result<AppliedMigration, sqlx::Error> {
                let elapsed_ms: i64 = row.try_get("execution_time_ms")?;
                Ok(AppliedMigration {
                    version: row.try_get("version")?,
                    name: row.try_get("name")?,
                    checksum: row.try_get("checksum")?,
                    applied_at: row.try_get::<DateTime<Utc>, _>("applied_at")?,
                    execution_time: Duration::from_millis(elapsed_ms.max(0) as u64),
                    backend_kind: BackendKind::Postgres,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| map_pg_error(e, "read migration history"))?;
        applied.sort_by(|a, b| Migration::compare_versions(&a.version, &b.version));
        Ok(applied)
    }

    async fn apply_migration(&self, migration: &Migration) -> StorageResult<AppliedMigration> {
        let pool = self.pool()?;
        let started = Instant::now();

        let mut tx = pool
            .begin()
            .await
            .map_err(|e| map_pg_error(e, "begin migration"))?;
        sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(&migration.content))
            .await
            .map_err(|e| Self::migration_error(migration, e))?;

        let execution_time = started.elapsed();
        let applied_at = Utc::now();
        sqlx::query(&format!(
            "INSERT INTO {} (version, name, checksum, applied_at, execution_time_ms, backend_kind) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            HISTORY_TABLE
        ))
        .bind(&migration.version)
        .bind(&migration.name)
        .bind(&migration.checksum)
        .bind(applied_at)
        .bind(execution_time.as_millis() as i64)
        .bind(BackendKind::Postgres.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_pg_error(e, "record migration"))?;

        tx.commit()
            .await
            .map_err(|e| map_commit_error(e, "commit migration"))?;
        self.invalidate_schema_cache();

        Ok(AppliedMigration {
            version: migration.version.clone(),
            name: migration.name.clone(),
            checksum: migration.checksum.clone(),
            applied_at,
            execution_time,
            backend_kind: BackendKind::Postgres,
        })
    }

    async fn acquire_migration_lock(&self, key: &str) -> StorageResult<Option<MigrationLock>> {
        let pool = self.pool()?;
        let lock_key = advisory_key(key);
        let mut conn = pool
            .acquire()
            .await
            .map_err(|e| map_pg_error(e, "acquire migration lock"))?;

        tracing::debug!(backend = BACKEND, lock = key, lock_key, "waiting for migration advisory lock");
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(lock_key)
            .execute(&mut *conn)
            .await
            .map_err(|e| map_pg_error(e, "acquire migration lock"))?;

        Ok(Some(MigrationLock::new(lock_key, conn)))
    }
}
