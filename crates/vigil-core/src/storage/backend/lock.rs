//! Cross-process migration lock

use sha2::{Digest, Sha256};
use sqlx::Postgres;
use sqlx::pool::PoolConnection;

use super::postgres::map_pg_error;
use crate::error::StorageResult;

/// A held PostgreSQL session-level advisory lock
///
/// The lock lives on a dedicated pooled connection. [`MigrationLock::release`]
/// unlocks and returns the connection to the pool; dropping the guard instead
/// detaches and closes the connection, which ends the session and frees the
/// lock on the server.
pub struct MigrationLock {
    key: i64,
    conn: Option<PoolConnection<Postgres>>,
}

impl MigrationLock {
    pub(crate) fn new(key: i64, conn: PoolConnection<Postgres>) -> Self {
        Self {
            key,
            conn: Some(conn),
        }
    }

    /// Numeric advisory lock key
    pub fn key(&self) -> i64 {
        self.key
    }

    /// Unlock and hand the connection back to the pool
    pub async fn release(mut self) -> StorageResult<()> {
        if let Some(mut conn) = self.conn.take() {
            sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(self.key)
                .execute(&mut *conn)
                .await
                .map_err(|e| map_pg_error(e, "release migration lock"))?;
            tracing::debug!(lock_key = self.key, "released migration advisory lock");
        }
        Ok(())
    }
}

impl Drop for MigrationLock {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::debug!(
                lock_key = self.key,
                "migration lock dropped without release, closing its connection"
            );
            drop(conn.detach());
        }
    }
}

impl std::fmt::Debug for MigrationLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationLock")
            .field("key", &self.key)
            .field("held", &self.conn.is_some())
            .finish()
    }
}

/// Stable 64-bit advisory key for a lock name
pub(crate) fn advisory_key(name: &str) -> i64 {
    let digest = Sha256::digest(name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}
