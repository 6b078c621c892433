//! Storage manager
//!
//! Owns the primary and fallback backends, routes every operation to the
//! active one and moves between them as health changes.
//!
//! # Example
//! ```ignore
//! let manager = StorageManager::connect(StorageConfig::from_env()?).await?;
//! let id = manager.insert("tool_events", Record::new().with("tool", "grep")).await?;
//! let recent = manager
//!     .with_timeout(Duration::from_secs(2))
//!     .select("tool_events", &SelectQuery::new().limit(10))
//!     .await?;
//! ```

mod builder;
mod connection;
mod failover;
mod monitor;
mod observer;
mod operations;
mod timed;
mod types;


pub use builder::StorageManagerBuilder;
pub use observer::{NoopObserver, OperationEvent, StorageObserver, Transition};
pub use timed::TimedStorage;
pub use types::{
    BackendHealth, BackendRole, BackendStatus, CircuitSnapshot, HealthSnapshot, HealthTrigger,
    StorageStats,
};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};
use crate::migration::{MigrationManager, MigrationReport};
use crate::recovery::{CircuitBreaker, CircuitBreakerRegistry, RetryPolicy};
use crate::storage::backend::{BackendKind, Record, SelectQuery, StorageBackend};
use monitor::MonitorHandle;

/// Which backend is serving
#[derive(Debug)]
struct ActiveState {
    role: Option<BackendRole>,
    status: BackendStatus,
    /// Bumped on every transition
    generation: u64,
}

#[derive(Debug, Default)]
struct HealthTable {
    primary: BackendHealth,
    fallback: BackendHealth,
}

impl HealthTable {
    fn get(&self, role: BackendRole) -> &BackendHealth {
        match role {
            BackendRole::Primary => &self.primary,
            BackendRole::Fallback => &self.fallback,
        }
    }

    fn get_mut(&mut self, role: BackendRole) -> &mut BackendHealth {
        match role {
            BackendRole::Primary => &mut self.primary,
            BackendRole::Fallback => &mut self.fallback,
        }
    }
}

/// State shared between the manager handle and its monitor task
pub(crate) struct ManagerInner {
    config: StorageConfig,
    primary: Option<Arc<dyn StorageBackend>>,
    fallback: Option<Arc<dyn StorageBackend>>,
    state: RwLock<ActiveState>,
    health: RwLock<HealthTable>,
    stats: Mutex<StorageStats>,
    breakers: CircuitBreakerRegistry,
    retry: RetryPolicy,
    observer: Arc<dyn StorageObserver>,
    /// Serializes health evaluations and transitions
    failover_lock: tokio::sync::Mutex<()>,
    migrations: Option<MigrationManager>,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl ManagerInner {
    fn backend(&self, role: BackendRole) -> Option<&Arc<dyn StorageBackend>> {
        match role {
            BackendRole::Primary => self.primary.as_ref(),
            BackendRole::Fallback => self.fallback.as_ref(),
        }
    }

    /// Whether the primary takes part under the configured strategy
    fn primary_in_play(&self) -> bool {
        self.primary.is_some() && self.config.fallback_strategy.uses_primary()
    }

    fn fallback_in_play(&self) -> bool {
        self.fallback.is_some() && self.config.fallback_strategy.uses_fallback()
    }

    /// Status the manager reports while `role` is serving
    ///
    /// The fallback only counts as degraded when a primary is in play.
    fn designated_status(&self, role: BackendRole) -> BackendStatus {
        match role {
            BackendRole::Primary => BackendStatus::Healthy,
            BackendRole::Fallback if self.primary_in_play() => BackendStatus::Degraded,
            BackendRole::Fallback => BackendStatus::Healthy,
        }
    }

    fn active(&self) -> (Option<(BackendRole, Arc<dyn StorageBackend>)>, u64) {
        let state = self.state.read();
        let active = state
            .role
            .and_then(|role| self.backend(role).map(|backend| (role, Arc::clone(backend))));
        (active, state.generation)
    }

    fn active_role(&self) -> Option<BackendRole> {
        self.state.read().role
    }

    fn generation(&self) -> u64 {
        self.state.read().generation
    }

    fn status(&self) -> BackendStatus {
        self.state.read().status
    }

    fn breaker(&self, role: BackendRole) -> Arc<CircuitBreaker> {
        self.breakers.get(role.as_str())
    }

    fn stats(&self) -> StorageStats {
        self.stats.lock().clone()
    }

    /// Run migrations against one backend role
    async fn migrate_role(&self, role: BackendRole) -> StorageResult<Option<MigrationReport>> {
        let (Some(migrations), Some(backend)) = (&self.migrations, self.backend(role)) else {
            return Ok(None);
        };
        let target = self.config.migrations.target.as_deref();
        migrations.migrate(backend.as_ref(), target).await.map(Some)
    }
}

/// Resilient storage front-end
///
/// Dropping the manager stops its health monitor; call
/// [`shutdown`](Self::shutdown) to also release the connection pools.
pub struct StorageManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("StorageManager")
            .field("status", &state.status)
            .field("active", &state.role)
            .field("strategy", &self.inner.config.fallback_strategy)
            .finish_non_exhaustive()
    }
}

impl StorageManager {
    /// Build backends from the config and connect
    pub async fn connect(config: StorageConfig) -> StorageResult<Self> {
        Self::builder(config).build().await
    }

    /// Start a builder for injecting backends or an observer
    pub fn builder(config: StorageConfig) -> StorageManagerBuilder {
        StorageManagerBuilder::new(config)
    }

    pub fn config(&self) -> &StorageConfig {
        &self.inner.config
    }

    pub fn status(&self) -> BackendStatus {
        self.inner.status()
    }

    /// Kind of the backend currently serving, if any
    pub fn active_backend(&self) -> Option<BackendKind> {
        let (active, _) = self.inner.active();
        active.map(|(_, backend)| backend.kind())
    }

    pub fn active_role(&self) -> Option<BackendRole> {
        self.inner.active_role()
    }

    pub fn stats(&self) -> StorageStats {
        self.inner.stats()
    }

    /// Per-call timeout override
    pub fn with_timeout(&self, timeout: Duration) -> TimedStorage<'_> {
        TimedStorage::new(self, timeout)
    }

    pub async fn insert(&self, table: &str, record: Record) -> StorageResult<String> {
        self.inner
            .insert(table, record, self.inner.config.operation_timeout)
            .await
    }

    pub async fn bulk_insert(&self, table: &str, records: Vec<Record>) -> StorageResult<Vec<String>> {
        self.inner
            .bulk_insert(table, records, self.inner.config.operation_timeout)
            .await
    }

    pub async fn select(&self, table: &str, query: &SelectQuery) -> StorageResult<Vec<Record>> {
        self.inner
            .select(table, query, self.inner.config.operation_timeout)
            .await
    }

    pub async fn update(&self, table: &str, id: &str, patch: Record) -> StorageResult<bool> {
        self.inner
            .update(table, id, patch, self.inner.config.operation_timeout)
            .await
    }

    pub async fn delete(&self, table: &str, id: &str) -> StorageResult<bool> {
        self.inner
            .delete(table, id, self.inner.config.operation_timeout)
            .await
    }

    pub async fn execute_raw(&self, sql: &str, params: &[Value]) -> StorageResult<Vec<Record>> {
        self.inner
            .execute_raw(sql, params, self.inner.config.operation_timeout)
            .await
    }

    /// Run a health evaluation now and return the resulting snapshot
    pub async fn check_health(&self) -> HealthSnapshot {
        self.inner.evaluate_locked(HealthTrigger::Manual).await;
        self.health_snapshot()
    }

    /// Current status without probing anything
    pub fn health_snapshot(&self) -> HealthSnapshot {
        let inner = &self.inner;
        let (active, _) = inner.active();
        let status = inner.status();
        let health = inner.health.read();
        let circuits = inner
            .breakers
            .all_stats()
            .into_iter()
            .map(|(role, stats)| CircuitSnapshot {
                role,
                state: stats.state,
                failure_count: stats.failure_count,
                rejected_calls: stats.rejected_calls,
            })
            .collect();

        HealthSnapshot {
            status,
            backend_kind: active.as_ref().map(|(_, backend)| backend.kind()),
            active_role: active.as_ref().map(|(role, _)| *role),
            healthy: status == BackendStatus::Healthy,
            primary: inner
                .primary
                .as_ref()
                .map(|_| health.get(BackendRole::Primary).clone()),
            fallback: inner
                .fallback
                .as_ref()
                .map(|_| health.get(BackendRole::Fallback).clone()),
            circuits,
            stats: inner.stats(),
            checked_at: Utc::now(),
        }
    }

    /// Apply pending migrations to the active backend
    pub async fn run_migrations(&self) -> StorageResult<MigrationReport> {
        if self.inner.migrations.is_none() {
            return Err(StorageError::config("no migrations directory configured"));
        }
        let role = self
            .inner
            .active_role()
            .ok_or(StorageError::NoAvailableBackend)?;
        self.inner
            .migrate_role(role)
            .await
            .map(Option::unwrap_or_default)
    }

    /// The migration runner bound to the configured directory
    pub fn migrations(&self) -> Option<&MigrationManager> {
        self.inner.migrations.as_ref()
    }

    /// The backend currently serving, for direct schema work
    pub fn active_storage(&self) -> Option<Arc<dyn StorageBackend>> {
        self.inner.active().0.map(|(_, backend)| backend)
    }

    /// Stop the monitor and disconnect both backends
    ///
    /// Operations issued afterwards fail with `NoAvailableBackend`.
    pub async fn shutdown(&self) -> StorageResult<()> {
        let handle = self.inner.monitor.lock().take();
        if let Some(handle) = handle {
            handle.stop().await;
        }

        let _guard = self.inner.failover_lock.lock().await;
        self.inner.transition(None, HealthTrigger::Shutdown);

        let mut first_error = None;
        for backend in [&self.inner.primary, &self.inner.fallback].into_iter().flatten() {
            if let Err(e) = backend.disconnect().await {
                tracing::warn!(backend = %backend.kind(), error = %e, "disconnect failed");
                first_error.get_or_insert(e);
            }
        }
        tracing::info!("storage manager shut down");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for StorageManager {
    fn drop(&mut self) {
        if let Some(handle) = self.inner.monitor.lock().take() {
            handle.cancel();
        }
    }
}
