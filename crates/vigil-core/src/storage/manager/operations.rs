//! Operation wrapper and the data operations built on it
//!
//! Each call is validated up front, then runs against the active backend
//! through its circuit breaker, under a timeout, with retries for transient
//! faults. When the backend itself is at fault the manager re-evaluates
//! health, and a call that caused a switch runs once more on the new backend
//! unless its outcome on the old one is unknown.

use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::ManagerInner;
use super::observer::OperationEvent;
use super::types::BackendRole;
use crate::error::{StorageError, StorageResult};
use crate::recovery::is_backend_fault;
use crate::storage::backend::sql::{validate_identifier, validate_record};
use crate::storage::backend::{BackendKind, Record, SelectQuery, StorageBackend};

impl ManagerInner {
    /// Run `call` against the active backend with recovery, recording stats
    async fn run<'a, T, F>(
        &self,
        operation: &'static str,
        table: &str,
        timeout: Duration,
        call: F,
    ) -> StorageResult<T>
    where
        F: Fn(Arc<dyn StorageBackend>) -> BoxFuture<'a, StorageResult<T>>,
    {
        let started = Instant::now();
        let (result, served_by) = self.run_with_failover(timeout, &call).await;
        let result = result.map_err(|e| e.with_context(operation, table));

        {
            let mut stats = self.stats.lock();
            stats.total_operations += 1;
            match &result {
                Ok(_) => stats.successful_operations += 1,
                Err(e) => {
                    stats.failed_operations += 1;
                    stats.last_error = Some(e.to_string());
                }
            }
        }

        if let Err(e) = &result {
            tracing::debug!(operation, table, error = %e, "storage operation failed");
        }
        self.observer.on_operation(&OperationEvent {
            operation,
            table,
            backend: served_by,
            elapsed: started.elapsed(),
            error: result.as_ref().err(),
        });
        result
    }

    async fn run_with_failover<'a, T, F>(
        &self,
        timeout: Duration,
        call: &F,
    ) -> (StorageResult<T>, Option<BackendKind>)
    where
        F: Fn(Arc<dyn StorageBackend>) -> BoxFuture<'a, StorageResult<T>>,
    {
        let mut switched = false;
        loop {
            let (active, generation) = self.active();
            let Some((role, backend)) = active else {
                return (Err(StorageError::NoAvailableBackend), None);
            };
            let kind = backend.kind();

            let error = match self.attempt(role, &backend, timeout, call).await {
                Ok(value) => {
                    self.health.write().get_mut(role).record_success();
                    return (Ok(value), Some(kind));
                }
                Err(e) => e,
            };

            let circuit_open = matches!(error.root(), StorageError::CircuitOpen { .. });
            if !circuit_open && !is_backend_fault(&error) {
                return (Err(error), Some(kind));
            }
            if !circuit_open {
                self.health.write().get_mut(role).record_failure(error.to_string());
            }
            if switched {
                return (Err(error), Some(kind));
            }

            tracing::warn!(
                role = %role,
                backend = %kind,
                error = %error,
                "backend failed, checking health"
            );
            if !self.reactive_check(generation).await {
                return (Err(error), Some(kind));
            }
            // The write may have landed on the old backend; running it again
            // elsewhere could apply it twice
            if matches!(error.root(), StorageError::UnknownOutcome { .. }) {
                return (Err(error), Some(kind));
            }
            switched = true;
        }
    }

    /// Attempts against one backend: breaker, timeout, retry
    async fn attempt<'a, T, F>(
        &self,
        role: BackendRole,
        backend: &Arc<dyn StorageBackend>,
        timeout: Duration,
        call: &F,
    ) -> StorageResult<T>
    where
        F: Fn(Arc<dyn StorageBackend>) -> BoxFuture<'a, StorageResult<T>>,
    {
        let breaker = self.breaker(role);
        let kind = backend.kind();
        let mut attempt = 0u32;

        loop {
            let result = breaker
                .call(|| async {
                    match tokio::time::timeout(timeout, call(Arc::clone(backend))).await {
                        Ok(result) => result,
                        Err(_) => Err(StorageError::timeout(kind.as_str(), timeout)),
                    }
                })
                .await;

            let error = match result {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if matches!(error, StorageError::CircuitOpen { .. }) {
                self.stats.lock().circuit_rejections += 1;
                self.observer.on_circuit_rejected(role);
                tracing::debug!(role = %role, backend = %kind, "circuit open, call rejected");
                return Err(error);
            }
            if !self.retry.should_retry(&error, attempt) {
                return Err(error);
            }

            let delay = self.retry.delay_for_attempt(attempt);
            self.stats.lock().retries += 1;
            self.observer.on_retry(role, attempt + 1, &error);
            tracing::debug!(
                backend = %kind,
                attempt = attempt + 1,
                max_attempts = self.retry.max_attempts(),
                ?delay,
                error = %error,
                "retrying after transient failure"
            );
            attempt += 1;
            tokio::time::sleep(delay).await;
        }
    }

    pub(super) async fn insert(
        &self,
        table: &str,
        mut record: Record,
        timeout: Duration,
    ) -> StorageResult<String> {
        validate_record(table, &record).map_err(|e| e.with_context("insert", table))?;
        record
            .ensure_identity()
            .map_err(|e| e.with_context("insert", table))?;

        self.run("insert", table, timeout, |backend| {
            let record = record.clone();
            Box::pin(async move { backend.insert(table, record).await })
        })
        .await
    }

    pub(super) async fn bulk_insert(
        &self,
        table: &str,
        mut records: Vec<Record>,
        timeout: Duration,
    ) -> StorageResult<Vec<String>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        for record in &mut records {
            validate_record(table, record).map_err(|e| e.with_context("bulk_insert", table))?;
            record
                .ensure_identity()
                .map_err(|e| e.with_context("bulk_insert", table))?;
        }

        self.run("bulk_insert", table, timeout, |backend| {
            let records = records.clone();
            Box::pin(async move { backend.bulk_insert(table, records).await })
        })
        .await
    }

    pub(super) async fn select(
        &self,
        table: &str,
        query: &SelectQuery,
        timeout: Duration,
    ) -> StorageResult<Vec<Record>> {
        validate_query(table, query).map_err(|e| e.with_context("select", table))?;

        self.run("select", table, timeout, |backend| {
            Box::pin(async move { backend.select(table, query).await })
        })
        .await
    }

    pub(super) async fn update(
        &self,
        table: &str,
        id: &str,
        patch: Record,
        timeout: Duration,
    ) -> StorageResult<bool> {
        validate_record(table, &patch).map_err(|e| e.with_context("update", table))?;

        self.run("update", table, timeout, |backend| {
            let patch = patch.clone();
            Box::pin(async move { backend.update(table, id, patch).await })
        })
        .await
    }

    pub(super) async fn delete(
        &self,
        table: &str,
        id: &str,
        timeout: Duration,
    ) -> StorageResult<bool> {
        validate_identifier(table).map_err(|e| e.with_context("delete", table))?;

        self.run("delete", table, timeout, |backend| {
            Box::pin(async move { backend.delete(table, id).await })
        })
        .await
    }

    pub(super) async fn execute_raw(
        &self,
        sql: &str,
        params: &[Value],
        timeout: Duration,
    ) -> StorageResult<Vec<Record>> {
        if sql.trim().is_empty() {
            return Err(StorageError::validation("empty SQL statement").with_context("execute_raw", "raw"));
        }

        self.run("execute_raw", "raw", timeout, |backend| {
            Box::pin(async move { backend.execute_raw(sql, params).await })
        })
        .await
    }
}

fn validate_query(table: &str, query: &SelectQuery) -> StorageResult<()> {
    validate_identifier(table)?;
    for field in query.filters.keys() {
        validate_identifier(field)?;
    }
    if let Some((field, _)) = &query.order_by {
        validate_identifier(field)?;
    }
    Ok(())
}
