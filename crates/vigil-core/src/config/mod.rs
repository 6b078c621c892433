//! Configuration for the storage layer
//!
//! Settings can be built programmatically, read from a TOML file, or taken
//! from `VIGIL_*` environment variables. Environment values override file
//! values when both are present.

mod env_loader;
mod file_loader;
mod logging;
mod storage;

pub use env_loader::{apply_env, env_lookup};
pub use file_loader::VigilConfig;
pub use logging::{LogFormat, LoggingConfig};
pub use storage::{
    ConnectionPool, FallbackStrategy, MigrationConfig, PostgresConfig, SqliteConfig, StorageConfig,
};
