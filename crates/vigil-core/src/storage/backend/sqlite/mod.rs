//! SQLite backend module
//!
//! The local fallback store: a WAL-mode database file accessed through a
//! small sqlx pool.

mod backend;
mod decode;
mod errors;

#[cfg(test)]
mod tests;

pub use backend::SqliteBackend;
