//! Per-call timeout override

use serde_json::Value;
use std::time::Duration;

use super::StorageManager;
use crate::error::StorageResult;
use crate::storage::backend::{Record, SelectQuery};

/// Borrowed view of a manager whose calls use a custom deadline
///
/// Created by [`StorageManager::with_timeout`].
#[derive(Debug, Clone, Copy)]
pub struct TimedStorage<'a> {
    manager: &'a StorageManager,
    timeout: Duration,
}

impl<'a> TimedStorage<'a> {
    pub(super) fn new(manager: &'a StorageManager, timeout: Duration) -> Self {
        Self { manager, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn insert(&self, table: &str, record: Record) -> StorageResult<String> {
        self.manager.inner.insert(table, record, self.timeout).await
    }

    pub async fn bulk_insert(&self, table: &str, records: Vec<Record>) -> StorageResult<Vec<String>> {
        self.manager
            .inner
            .bulk_insert(table, records, self.timeout)
            .await
    }

    pub async fn select(&self, table: &str, query: &SelectQuery) -> StorageResult<Vec<Record>> {
        self.manager.inner.select(table, query, self.timeout).await
    }

    pub async fn update(&self, table: &str, id: &str, patch: Record) -> StorageResult<bool> {
        self.manager
            .inner
            .update(table, id, patch, self.timeout)
            .await
    }

    pub async fn delete(&self, table: &str, id: &str) -> StorageResult<bool> {
        self.manager.inner.delete(table, id, self.timeout).await
    }

    pub async fn execute_raw(&self, sql: &str, params: &[Value]) -> StorageResult<Vec<Record>> {
        self.manager
            .inner
            .execute_raw(sql, params, self.timeout)
            .await
    }
}
