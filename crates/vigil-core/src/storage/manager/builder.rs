//! Storage manager construction

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use super::observer::{NoopObserver, StorageObserver};
use super::types::{BackendStatus, StorageStats};
use super::{ActiveState, HealthTable, ManagerInner, StorageManager, monitor};
use crate::config::StorageConfig;
use crate::error::StorageResult;
use crate::migration::MigrationManager;
use crate::recovery::{CircuitBreakerRegistry, RetryPolicy};
use crate::storage::backend::{PostgresBackend, SqliteBackend, StorageBackend};

/// Builder for [`StorageManager`]
///
/// Backends not supplied explicitly are created from the config.
pub struct StorageManagerBuilder {
    config: StorageConfig,
    primary: Option<Arc<dyn StorageBackend>>,
    fallback: Option<Arc<dyn StorageBackend>>,
    observer: Arc<dyn StorageObserver>,
    monitor: bool,
}

impl StorageManagerBuilder {
    pub(super) fn new(config: StorageConfig) -> Self {
        Self {
            config,
            primary: None,
            fallback: None,
            observer: Arc::new(NoopObserver),
            monitor: true,
        }
    }

    /// Use this backend as the primary instead of one built from `postgres`
    pub fn primary(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.primary = Some(backend);
        self
    }

    /// Use this backend as the fallback instead of one built from `sqlite`
    pub fn fallback(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.fallback = Some(backend);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn StorageObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Skip the background health monitor; health is then only evaluated reactively
    pub fn without_monitor(mut self) -> Self {
        self.monitor = false;
        self
    }

    /// Validate, connect, run startup migrations and start the monitor
    pub async fn build(self) -> StorageResult<StorageManager> {
        let config = self.config;
        config.validate_settings()?;

        let strategy = config.fallback_strategy;
        let primary = match self.primary {
            Some(backend) => Some(backend),
            None => config.postgres.clone().map(|pg| {
                Arc::new(
                    PostgresBackend::new(pg).with_health_timeout(config.health_check_timeout),
                ) as Arc<dyn StorageBackend>
            }),
        }
        .filter(|_| strategy.uses_primary());
        let fallback = self
            .fallback
            .unwrap_or_else(|| {
                Arc::new(
                    SqliteBackend::new(config.sqlite.clone())
                        .with_health_timeout(config.health_check_timeout),
                ) as Arc<dyn StorageBackend>
            });
        let fallback = Some(fallback).filter(|_| strategy.uses_fallback());
        config.validate_strategy(primary.is_some())?;

        let migrations = config.migrations.dir.clone().map(MigrationManager::new);
        let inner = Arc::new(ManagerInner {
            retry: RetryPolicy::new(config.retry.clone()),
            breakers: CircuitBreakerRegistry::with_config(config.circuit_breaker.clone()),
            primary,
            fallback,
            state: RwLock::new(ActiveState {
                role: None,
                status: BackendStatus::Failed,
                generation: 0,
            }),
            health: RwLock::new(HealthTable::default()),
            stats: Mutex::new(StorageStats::default()),
            observer: self.observer,
            failover_lock: tokio::sync::Mutex::new(()),
            migrations,
            monitor: Mutex::new(None),
            config,
        });

        inner.establish().await?;

        if inner.config.migrations.auto_migrate {
            if let Some(role) = inner.active_role() {
                if let Some(report) = inner.migrate_role(role).await? {
                    tracing::info!(
                        applied = report.applied.len(),
                        already_applied = report.already_applied,
                        "startup migrations complete"
                    );
                }
            }
        }

        if self.monitor {
            let handle = monitor::spawn(&inner);
            *inner.monitor.lock() = Some(handle);
        }

        Ok(StorageManager { inner })
    }
}
