//! Storage layer
//!
//! `backend` holds the uniform client contract and its PostgreSQL and
//! SQLite implementations; `manager` puts failover, retries and circuit
//! breaking in front of them.

pub mod backend;
pub mod manager;

pub use backend::{
    BackendKind, MigrationLock, PostgresBackend, Record, SelectQuery, SortOrder, SqliteBackend,
    StorageBackend, validate_identifier,
};
pub use manager::{
    BackendHealth, BackendRole, BackendStatus, CircuitSnapshot, HealthSnapshot, HealthTrigger,
    NoopObserver, OperationEvent, StorageManager, StorageManagerBuilder, StorageObserver,
    StorageStats, TimedStorage, Transition,
};
