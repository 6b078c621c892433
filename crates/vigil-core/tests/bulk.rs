//! Bulk insert atomicity through the manager

mod common;

use tempfile::TempDir;

use common::write_sqlite_tree;
use vigil_core::{
    BackendStatus, Record, RetryConfig, SelectQuery, StorageConfig, StorageError, StorageManager,
};

async fn manager(dir: &TempDir) -> StorageManager {
    write_sqlite_tree(
        dir.path(),
        &[(
            "V001__create_readings.sql",
            "CREATE TABLE readings (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                seq INTEGER NOT NULL UNIQUE,
                value REAL
            );",
        )],
    );
    let config = StorageConfig::sqlite_only(dir.path().join("vigil.db"))
        .with_retry(RetryConfig::no_retry())
        .with_migrations_dir(dir.path());
    StorageManager::builder(config)
        .without_monitor()
        .build()
        .await
        .unwrap()
}

fn reading(seq: i64) -> Record {
    Record::new().with("seq", seq).with("value", seq as f64 * 0.5)
}

#[tokio::test]
async fn test_duplicate_row_rolls_back_whole_batch() {
    common::init_tracing();
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir).await;
    assert_eq!(manager.status(), BackendStatus::Healthy);

    let mut batch: Vec<Record> = (0..100).map(reading).collect();
    batch[50] = reading(0);

    let err = manager.bulk_insert("readings", batch).await.unwrap_err();
    assert!(
        matches!(err.root(), StorageError::Constraint { .. }),
        "unexpected error: {err}"
    );

    let rows = manager.select("readings", &SelectQuery::new()).await.unwrap();
    assert!(rows.is_empty());
    // Constraint errors are the caller's problem, not the backend's
    assert_eq!(manager.status(), BackendStatus::Healthy);
    assert_eq!(manager.stats().failovers, 0);

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_bulk_insert_returns_ids_in_input_order() {
    common::init_tracing();
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir).await;

    let batch: Vec<Record> = (0..100).map(reading).collect();
    let ids = manager.bulk_insert("readings", batch).await.unwrap();
    assert_eq!(ids.len(), 100);

    let first = manager
        .select("readings", &SelectQuery::new().filter("seq", 0))
        .await
        .unwrap();
    assert_eq!(first[0].id(), Some(ids[0].as_str()));
    let last = manager
        .select("readings", &SelectQuery::new().filter("seq", 99))
        .await
        .unwrap();
    assert_eq!(last[0].id(), Some(ids[99].as_str()));

    assert!(manager.bulk_insert("readings", Vec::new()).await.unwrap().is_empty());
    manager.shutdown().await.unwrap();
}
