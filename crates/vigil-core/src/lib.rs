//! Vigil core library
//!
//! Resilient storage for telemetry: a uniform backend contract with
//! PostgreSQL and SQLite clients, retry and circuit-breaker recovery, a
//! failover-aware storage manager and a versioned migration runner.
//!
//! # Example
//! ```ignore
//! let config = StorageConfig::default()
//!     .with_primary("postgresql://localhost/telemetry")
//!     .with_fallback_sqlite("data/vigil.db")
//!     .with_migrations_dir("migrations");
//!
//! let storage = StorageManager::connect(config).await?;
//! let id = storage.insert("sessions", Record::new().with("user", "ada")).await?;
//! ```

pub mod config;
pub mod error;
pub mod migration;
pub mod recovery;
pub mod storage;

pub use config::{FallbackStrategy, LoggingConfig, StorageConfig, VigilConfig};
pub use error::{StorageError, StorageResult};
pub use migration::{
    AppliedMigration, Migration, MigrationManager, MigrationReport, MigrationState,
    MigrationStatus,
};
pub use recovery::{CircuitBreaker, CircuitState, RetryConfig, RetryPolicy};
pub use storage::{
    BackendHealth, BackendKind, BackendRole, BackendStatus, HealthSnapshot, NoopObserver, Record,
    SelectQuery, SortOrder, StorageBackend, StorageManager, StorageObserver, StorageStats,
    TimedStorage,
};
