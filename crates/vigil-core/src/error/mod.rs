//! Error types for Vigil storage
//!
//! Every fallible operation in the crate returns [`StorageError`]. The variants
//! follow the retry taxonomy used by [`crate::recovery::classify_error`]:
//! infrastructure faults are retryable, caller-data and integrity faults are
//! terminal, and fail-fast variants (`CircuitOpen`, `NoAvailableBackend`) never
//! reach a backend.

mod constructors;
mod types;

pub use types::{StorageError, StorageResult};
