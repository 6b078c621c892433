//! Storage backend implementations
//!
//! Provides the uniform backend contract with PostgreSQL (primary) and
//! SQLite (fallback) clients built on sqlx.

mod lock;
mod postgres;
pub(crate) mod sql;
mod sqlite;
#[allow(clippy::module_inception)]
mod r#trait;
mod types;

pub use lock::MigrationLock;
pub use postgres::PostgresBackend;
pub use r#trait::StorageBackend;
#[cfg(test)]
pub use r#trait::MockStorageBackend;
pub use sql::validate_identifier;
pub use sqlite::SqliteBackend;
pub use types::{
    BackendKind, CREATED_AT_FIELD, ID_FIELD, Record, SelectQuery, SortOrder, new_record_id,
    timestamp_now,
};
