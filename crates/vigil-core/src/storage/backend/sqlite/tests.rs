//! Tests for SQLite backend

use serde_json::json;
use tempfile::TempDir;

use super::backend::SqliteBackend;
use crate::config::SqliteConfig;
use crate::error::StorageError;
use crate::storage::backend::r#trait::StorageBackend;
use crate::storage::backend::types::{BackendKind, Record, SelectQuery, SortOrder};

const SCHEMA: &str = "CREATE TABLE tool_events (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    session_id TEXT,
    tool TEXT,
    duration_ms INTEGER,
    success BOOLEAN,
    payload JSON,
    note TEXT
)";

async fn backend_in(dir: &TempDir) -> SqliteBackend {
    let backend = SqliteBackend::new(SqliteConfig::new(dir.path().join("nested/vigil.db")));
    backend.connect().await.unwrap();
    backend.execute_raw(SCHEMA, &[]).await.unwrap();
    backend
}

fn event(session: &str, tool: &str, duration: i64) -> Record {
    Record::new()
        .with("session_id", session)
        .with("tool", tool)
        .with("duration_ms", duration)
}

#[tokio::test]
async fn test_sqlite_backend_connect() {
    let dir = TempDir::new().unwrap();
    let backend = SqliteBackend::new(SqliteConfig::new(dir.path().join("a/b/vigil.db")));
    assert!(!backend.is_connected());
    assert!(!backend.health_check().await);

    backend.connect().await.unwrap();
    assert!(backend.is_connected());
    assert!(backend.health_check().await);
    assert_eq!(backend.kind(), BackendKind::Sqlite);
    assert!(dir.path().join("a/b/vigil.db").exists());

    // Idempotent
    backend.connect().await.unwrap();
    assert!(backend.is_connected());
}

#[tokio::test]
async fn test_wal_mode_enabled() {
    let dir = TempDir::new().unwrap();
    let backend = backend_in(&dir).await;

    let rows = backend.execute_raw("PRAGMA journal_mode", &[]).await.unwrap();
    assert_eq!(rows[0].get_str("journal_mode"), Some("wal"));
}

#[tokio::test]
async fn test_sqlite_backend_close() {
    let dir = TempDir::new().unwrap();
    let backend = backend_in(&dir).await;

    backend.disconnect().await.unwrap();
    assert!(!backend.is_connected());
    backend.disconnect().await.unwrap();

    let result = backend.insert("tool_events", event("s", "bash", 1)).await;
    assert!(matches!(result, Err(StorageError::BackendUnavailable { .. })));
}

#[tokio::test]
async fn test_insert_generates_identity_and_roundtrips_nested() {
    let dir = TempDir::new().unwrap();
    let backend = backend_in(&dir).await;

    let id = backend
        .insert(
            "tool_events",
            event("s1", "bash", 12)
                .with("success", true)
                .with("payload", json!({"argv": ["ls", "-la"], "exit": 0})),
        )
        .await
        .unwrap();
    assert!(uuid::Uuid::parse_str(&id).is_ok());

    let rows = backend
        .select("tool_events", &SelectQuery::new().filter("id", id.clone()))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.id(), Some(id.as_str()));
    assert!(row.created_at().is_some_and(|ts| ts.ends_with('Z')));
    assert_eq!(row.get("payload"), Some(&json!({"argv": ["ls", "-la"], "exit": 0})));
    // Booleans come back as integers
    assert_eq!(row.get("success"), Some(&json!(1)));
    assert_eq!(row.get_bool("success"), Some(true));
}

#[tokio::test]
async fn test_json_looking_text_stays_a_string() {
    let dir = TempDir::new().unwrap();
    let backend = backend_in(&dir).await;

    let id = backend
        .insert(
            "tool_events",
            event("s1", "bash", 1)
                .with("note", "[1, 2]")
                .with("payload", "{\"not\": \"parsed\"}"),
        )
        .await
        .unwrap();

    let rows = backend
        .select("tool_events", &SelectQuery::new().filter("id", id))
        .await
        .unwrap();
    // Text columns are verbatim; JSON columns keep the written type
    assert_eq!(rows[0].get("note"), Some(&json!("[1, 2]")));
    assert_eq!(rows[0].get("payload"), Some(&json!("{\"not\": \"parsed\"}")));

    let scalar = backend
        .insert("tool_events", event("s2", "bash", 1).with("payload", json!([1, 2])))
        .await
        .unwrap();
    let rows = backend
        .select("tool_events", &SelectQuery::new().filter("id", scalar))
        .await
        .unwrap();
    assert_eq!(rows[0].get("payload"), Some(&json!([1, 2])));
}

#[tokio::test]
async fn test_select_filters_and_ordering() {
    let dir = TempDir::new().unwrap();
    let backend = backend_in(&dir).await;

    let records = vec![
        event("s1", "bash", 30).with("created_at", "2024-01-01T00:00:01.000000Z"),
        event("s1", "edit", 10).with("created_at", "2024-01-01T00:00:02.000000Z"),
        event("s1", "grep", 20).with("created_at", "2024-01-01T00:00:03.000000Z"),
        event("s2", "bash", 40).with("created_at", "2024-01-01T00:00:04.000000Z"),
    ];
    backend.bulk_insert("tool_events", records).await.unwrap();

    // Default order is newest first
    let rows = backend
        .select("tool_events", &SelectQuery::new().filter("session_id", "s1"))
        .await
        .unwrap();
    let tools: Vec<_> = rows.iter().filter_map(|r| r.get_str("tool")).collect();
    assert_eq!(tools, vec!["grep", "edit", "bash"]);

    // Inclusion filter with explicit order
    let rows = backend
        .select(
            "tool_events",
            &SelectQuery::new()
                .filter("tool", json!(["bash", "grep"]))
                .order_by("duration_ms", SortOrder::Asc),
        )
        .await
        .unwrap();
    let durations: Vec<_> = rows.iter().filter_map(|r| r.get_i64("duration_ms")).collect();
    assert_eq!(durations, vec![20, 30, 40]);

    // IS NULL filter
    let rows = backend
        .select("tool_events", &SelectQuery::new().filter("payload", json!(null)))
        .await
        .unwrap();
    assert_eq!(rows.len(), 4);

    // Paging
    let rows = backend
        .select("tool_events", &SelectQuery::new().limit(2).offset(1))
        .await
        .unwrap();
    let tools: Vec<_> = rows.iter().filter_map(|r| r.get_str("tool")).collect();
    assert_eq!(tools, vec!["grep", "edit"]);

    let rows = backend
        .select("tool_events", &SelectQuery::new().offset(3))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_bulk_insert_rolls_back_whole_batch() {
    let dir = TempDir::new().unwrap();
    let backend = backend_in(&dir).await;

    let mut records: Vec<Record> = (0..100)
        .map(|i| event("bulk", "bash", i).with("id", format!("evt-{:03}", i)))
        .collect();
    // Row 51 repeats the id of row 10
    records[50] = event("bulk", "bash", 50).with("id", "evt-010");

    let result = backend.bulk_insert("tool_events", records).await;
    assert!(matches!(result, Err(StorageError::Constraint { .. })));

    let rows = backend
        .select("tool_events", &SelectQuery::new().filter("session_id", "bulk"))
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_bulk_insert_empty_is_noop() {
    let dir = TempDir::new().unwrap();
    let backend = backend_in(&dir).await;
    assert!(backend.bulk_insert("tool_events", Vec::new()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_update_and_delete() {
    let dir = TempDir::new().unwrap();
    let backend = backend_in(&dir).await;

    let id = backend
        .insert("tool_events", event("s1", "bash", 5))
        .await
        .unwrap();

    let changed = backend
        .update("tool_events", &id, Record::new().with("duration_ms", 99))
        .await
        .unwrap();
    assert!(changed);
    assert!(
        !backend
            .update("tool_events", "missing", Record::new().with("duration_ms", 1))
            .await
            .unwrap()
    );

    let immutable = backend
        .update("tool_events", &id, Record::new().with("id", "other"))
        .await;
    assert!(matches!(immutable, Err(StorageError::Validation(_))));

    let rows = backend
        .select("tool_events", &SelectQuery::new().filter("id", id.clone()))
        .await
        .unwrap();
    assert_eq!(rows[0].get_i64("duration_ms"), Some(99));

    assert!(backend.delete("tool_events", &id).await.unwrap());
    assert!(!backend.delete("tool_events", &id).await.unwrap());
}

#[tokio::test]
async fn test_execute_raw_binds_parameters() {
    let dir = TempDir::new().unwrap();
    let backend = backend_in(&dir).await;
    backend
        .insert("tool_events", event("s1", "bash", 5))
        .await
        .unwrap();

    // An injection attempt stays a literal value
    let rows = backend
        .execute_raw(
            "SELECT count(*) AS n FROM tool_events WHERE session_id = ?",
            &[json!("s1' OR '1'='1")],
        )
        .await
        .unwrap();
    assert_eq!(rows[0].get_i64("n"), Some(0));

    let rows = backend
        .execute_raw(
            "SELECT count(*) AS n FROM tool_events WHERE session_id = ?",
            &[json!("s1")],
        )
        .await
        .unwrap();
    assert_eq!(rows[0].get_i64("n"), Some(1));
}

#[tokio::test]
async fn test_error_classes() {
    let dir = TempDir::new().unwrap();
    let backend = backend_in(&dir).await;

    let bad_table = backend.insert("no_such_table", event("s", "t", 1)).await;
    assert!(matches!(bad_table, Err(StorageError::Validation(_))));

    let bad_column = backend
        .insert("tool_events", Record::new().with("nonexistent", 1))
        .await;
    assert!(matches!(bad_column, Err(StorageError::Validation(_))));

    let bad_identifier = backend
        .select("tool_events; DROP TABLE tool_events", &SelectQuery::new())
        .await;
    assert!(matches!(bad_identifier, Err(StorageError::Validation(_))));

    backend
        .insert("tool_events", event("s", "t", 1).with("id", "dup"))
        .await
        .unwrap();
    let duplicate = backend
        .insert("tool_events", event("s", "t", 1).with("id", "dup"))
        .await;
    assert!(matches!(duplicate, Err(StorageError::Constraint { .. })));
}

#[tokio::test]
async fn test_no_migration_lock() {
    let dir = TempDir::new().unwrap();
    let backend = backend_in(&dir).await;
    assert!(backend.acquire_migration_lock("any").await.unwrap().is_none());
}
