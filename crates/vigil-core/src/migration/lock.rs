//! In-process migration locks
//!
//! One async mutex per `(migration root, backend kind)`, shared by every
//! `MigrationManager` in the process. The backend's own advisory lock covers
//! other processes.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

static LOCKS: Lazy<DashMap<String, Arc<Mutex<()>>>> = Lazy::new(DashMap::new);

/// Wait for the process-wide lock on `key`
pub(crate) async fn acquire(key: &str) -> OwnedMutexGuard<()> {
    let mutex = LOCKS
        .entry(key.to_string())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone();
    mutex.lock_owned().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let guard = acquire("/srv/migrations/sqlite-test-exclusive").await;
        let waiting = tokio::spawn(async {
            let _guard = acquire("/srv/migrations/sqlite-test-exclusive").await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        drop(guard);
        waiting.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let _a = acquire("/srv/migrations/postgres-test-independent").await;
        let _b = acquire("/srv/migrations/sqlite-test-independent").await;
    }
}
