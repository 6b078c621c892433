//! Tests for the PostgreSQL backend
//!
//! Tests that need a server read `VIGIL_TEST_POSTGRES_URL` and return early
//! when it is unset.

use serde_json::json;

use super::backend::PostgresBackend;
use crate::config::PostgresConfig;
use crate::error::StorageError;
use crate::storage::backend::r#trait::StorageBackend;
use crate::storage::backend::types::{BackendKind, Record, SelectQuery};

fn test_url() -> Option<String> {
    std::env::var("VIGIL_TEST_POSTGRES_URL").ok().filter(|v| !v.is_empty())
}

async fn connected_backend() -> Option<PostgresBackend> {
    let url = test_url()?;
    let backend = PostgresBackend::new(PostgresConfig::new(url));
    backend.connect().await.ok()?;
    Some(backend)
}

async fn scratch_table(backend: &PostgresBackend) -> String {
    let table = format!("vigil_test_{}", uuid::Uuid::new_v4().simple());
    backend
        .execute_raw(
            &format!(
                "CREATE TABLE {} (
                    id UUID PRIMARY KEY,
                    created_at TIMESTAMPTZ NOT NULL,
                    session_id TEXT,
                    attempts INTEGER,
                    payload JSONB
                )",
                table
            ),
            &[],
        )
        .await
        .unwrap();
    table
}

async fn drop_table(backend: &PostgresBackend, table: &str) {
    let _ = backend
        .execute_raw(&format!("DROP TABLE IF EXISTS {}", table), &[])
        .await;
}

#[tokio::test]
async fn test_unconnected_backend_is_unavailable() {
    let backend = PostgresBackend::new(PostgresConfig::new("postgresql://localhost:1/none"));
    assert_eq!(backend.kind(), BackendKind::Postgres);
    assert!(!backend.is_connected());
    assert!(!backend.health_check().await);

    let result = backend.insert("sessions", Record::new().with("a", 1)).await;
    assert!(matches!(result, Err(StorageError::BackendUnavailable { .. })));
}

#[tokio::test]
async fn test_invalid_table_rejected_before_io() {
    let backend = PostgresBackend::new(PostgresConfig::new("postgresql://localhost:1/none"));
    let result = backend.select("sessions; --", &SelectQuery::new()).await;
    assert!(matches!(result, Err(StorageError::Validation(_))));
}

#[tokio::test]
async fn test_insert_and_select_roundtrip() {
    let Some(backend) = connected_backend().await else {
        return;
    };
    let table = scratch_table(&backend).await;

    let id = backend
        .insert(
            &table,
            Record::new()
                .with("session_id", "s1")
                .with("attempts", 2)
                .with("payload", json!({"tool": "bash", "args": ["-c", "ls"]})),
        )
        .await
        .unwrap();

    let rows = backend
        .select(&table, &SelectQuery::new().filter("session_id", "s1"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id(), Some(id.as_str()));
    assert_eq!(rows[0].get_i64("attempts"), Some(2));
    assert_eq!(rows[0].get("payload"), Some(&json!({"tool": "bash", "args": ["-c", "ls"]})));
    assert!(rows[0].created_at().is_some_and(|ts| ts.ends_with('Z')));

    drop_table(&backend, &table).await;
}

#[tokio::test]
async fn test_bulk_insert_is_atomic() {
    let Some(backend) = connected_backend().await else {
        return;
    };
    let table = scratch_table(&backend).await;
    let duplicate = uuid::Uuid::new_v4().to_string();

    let records = vec![
        Record::new().with("id", duplicate.clone()).with("session_id", "a"),
        Record::new().with("session_id", "b"),
        Record::new().with("id", duplicate).with("session_id", "c"),
    ];
    let result = backend.bulk_insert(&table, records).await;
    assert!(matches!(result, Err(StorageError::Constraint { .. })));

    let rows = backend.select(&table, &SelectQuery::new()).await.unwrap();
    assert!(rows.is_empty());

    drop_table(&backend, &table).await;
}

#[tokio::test]
async fn test_unknown_column_is_validation_error() {
    let Some(backend) = connected_backend().await else {
        return;
    };
    let table = scratch_table(&backend).await;

    let result = backend
        .insert(&table, Record::new().with("nonexistent", 1))
        .await;
    assert!(matches!(result, Err(StorageError::Validation(_))));

    let result = backend.select("vigil_no_such_table", &SelectQuery::new()).await;
    assert!(matches!(result, Err(StorageError::Validation(_))));

    drop_table(&backend, &table).await;
}

#[tokio::test]
async fn test_update_and_delete() {
    let Some(backend) = connected_backend().await else {
        return;
    };
    let table = scratch_table(&backend).await;

    let id = backend
        .insert(&table, Record::new().with("attempts", 1))
        .await
        .unwrap();
    assert!(
        backend
            .update(&table, &id, Record::new().with("attempts", 5))
            .await
            .unwrap()
    );
    let rows = backend
        .select(&table, &SelectQuery::new().filter("id", id.clone()))
        .await
        .unwrap();
    assert_eq!(rows[0].get_i64("attempts"), Some(5));

    assert!(backend.delete(&table, &id).await.unwrap());
    assert!(!backend.delete(&table, &id).await.unwrap());

    drop_table(&backend, &table).await;
}

#[tokio::test]
async fn test_advisory_lock_roundtrip() {
    let Some(backend) = connected_backend().await else {
        return;
    };

    let lock = backend
        .acquire_migration_lock("vigil-test-lock")
        .await
        .unwrap()
        .expect("postgres supports advisory locks");
    lock.release().await.unwrap();

    // Reacquiring after release must not block
    let again = backend.acquire_migration_lock("vigil-test-lock").await.unwrap();
    assert!(again.is_some());
}
