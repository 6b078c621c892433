//! Versioned schema migrations
//!
//! Scripts are discovered per backend kind, verified against the recorded
//! checksums, planned in version order and applied one transaction each.
//! History lives in the `vigil_schema_history` table of every backend.

mod checksum;
mod discovery;
mod lock;
mod runner;
mod types;

pub use checksum::checksum;
pub use discovery::{discover, parse_file_name};
pub use runner::MigrationManager;
pub use types::{
    AppliedMigration, HISTORY_TABLE, Migration, MigrationReport, MigrationState, MigrationStatus,
};
