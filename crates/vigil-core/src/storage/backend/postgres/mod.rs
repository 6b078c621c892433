//! PostgreSQL backend module
//!
//! The primary store: a pooled sqlx client with per-table column type
//! introspection so JSON records bind to native column types.

mod backend;
mod decode;
mod errors;

#[cfg(test)]
mod tests;

pub use backend::PostgresBackend;
pub(crate) use errors::map_pg_error;
