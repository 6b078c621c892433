//! Mapping of sqlx/SQLite errors onto the storage taxonomy

use sqlx::error::ErrorKind;

use crate::error::StorageError;

const BACKEND: &str = "sqlite";

/// Primary result code of a possibly extended SQLite code
fn primary_code(code: &str) -> Option<i32> {
    code.parse::<i32>().ok().map(|c| c & 0xff)
}

/// Classify a driver error raised while performing `operation`
pub(super) fn map_sqlite_error(error: sqlx::Error, operation: &str) -> StorageError {
    match error {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            let message = format!("{}: {} (code {})", operation, db.message(), code);

            match db.kind() {
                ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation => return StorageError::constraint(BACKEND, message),
                _ => {}
            }

            match primary_code(&code) {
                // BUSY, LOCKED
                Some(5) | Some(6) => StorageError::unavailable(BACKEND, message),
                // NOMEM, IOERR, FULL, CANTOPEN, PROTOCOL
                Some(7) | Some(10) | Some(13) | Some(14) | Some(15) => {
                    StorageError::unavailable(BACKEND, message)
                }
                Some(19) => StorageError::constraint(BACKEND, message),
                // ERROR (no such table/column, syntax), MISMATCH, RANGE
                Some(1) | Some(20) | Some(25) => StorageError::validation(message),
                _ => StorageError::backend(BACKEND, message),
            }
        }
        sqlx::Error::PoolTimedOut => {
            StorageError::unavailable(BACKEND, format!("{}: connection pool exhausted", operation))
        }
        sqlx::Error::PoolClosed => {
            StorageError::unavailable(BACKEND, format!("{}: connection pool closed", operation))
        }
        sqlx::Error::WorkerCrashed => {
            StorageError::unavailable(BACKEND, format!("{}: connection worker crashed", operation))
        }
        sqlx::Error::Io(e) => StorageError::unavailable(BACKEND, format!("{}: {}", operation, e)),
        sqlx::Error::Configuration(e) => StorageError::config(format!("sqlite {}: {}", operation, e)),
        e @ (sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. }) => {
            StorageError::Serialization(format!("{}: {}", operation, e))
        }
        sqlx::Error::Encode(e) => StorageError::validation(format!("{}: {}", operation, e)),
        other => StorageError::backend(BACKEND, format!("{}: {}", operation, other)),
    }
}
