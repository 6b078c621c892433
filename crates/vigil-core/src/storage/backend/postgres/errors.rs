//! Mapping of sqlx/PostgreSQL errors onto the storage taxonomy

use sqlx::error::ErrorKind;

use crate::error::StorageError;

const BACKEND: &str = "postgres";

/// SQLSTATEs meaning the server or the link to it is unusable right now
fn is_unavailable_state(code: &str) -> bool {
    code.starts_with("08")
        || matches!(
            code,
            "53300" | "57P01" | "57P02" | "57P03" | "40001" | "40P01" | "55P03"
        )
}

/// SQLSTATEs for authentication and privilege failures
fn is_access_state(code: &str) -> bool {
    code.starts_with("28") || code == "42501"
}

/// SQLSTATEs blaming the statement or its data
fn is_caller_state(code: &str) -> bool {
    code.starts_with("22") || code.starts_with("42")
}

/// Classify a driver error raised while performing `operation`
pub(crate) fn map_pg_error(error: sqlx::Error, operation: &str) -> StorageError {
    match error {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            let message = format!("{}: {} (SQLSTATE {})", operation, db.message(), code);

            if is_unavailable_state(&code) {
                return StorageError::unavailable(BACKEND, message);
            }
            if is_access_state(&code) {
                return StorageError::backend(BACKEND, message);
            }
            match db.kind() {
                ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation => StorageError::constraint(BACKEND, message),
                _ if code.starts_with("23") => StorageError::constraint(BACKEND, message),
                _ if is_caller_state(&code) => StorageError::validation(message),
                _ => StorageError::backend(BACKEND, message),
            }
        }
        sqlx::Error::PoolTimedOut => {
            StorageError::unavailable(BACKEND, format!("{}: connection pool exhausted", operation))
        }
        sqlx::Error::PoolClosed => {
            StorageError::unavailable(BACKEND, format!("{}: connection pool closed", operation))
        }
        sqlx::Error::Io(e) => StorageError::unavailable(BACKEND, format!("{}: {}", operation, e)),
        sqlx::Error::Tls(e) => StorageError::unavailable(BACKEND, format!("{}: tls: {}", operation, e)),
        sqlx::Error::WorkerCrashed => {
            StorageError::unavailable(BACKEND, format!("{}: connection worker crashed", operation))
        }
        sqlx::Error::Configuration(e) => {
            StorageError::config(format!("postgres {}: {}", operation, e))
        }
        e @ (sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. }) => {
            StorageError::Serialization(format!("{}: {}", operation, e))
        }
        sqlx::Error::Encode(e) => StorageError::validation(format!("{}: {}", operation, e)),
        other => StorageError::backend(BACKEND, format!("{}: {}", operation, other)),
    }
}

/// Classify a failed `COMMIT`
///
/// Deferred constraint failures are a definite rollback. Anything else leaves
/// the write in an unknown state: the server may have committed before the
/// connection broke.
pub(crate) fn map_commit_error(error: sqlx::Error, operation: &str) -> StorageError {
    match map_pg_error(error, operation) {
        e @ StorageError::Constraint { .. } => e,
        other => StorageError::unknown_outcome(BACKEND, format!("commit not confirmed: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlstate_families() {
        assert!(is_unavailable_state("08006"));
        assert!(is_unavailable_state("57P01"));
        assert!(is_unavailable_state("53300"));
        assert!(!is_unavailable_state("23505"));

        assert!(is_access_state("28P01"));
        assert!(is_access_state("42501"));
        assert!(!is_access_state("42P01"));

        assert!(is_caller_state("42P01"));
        assert!(is_caller_state("22P02"));
    }

    #[test]
    fn test_pool_errors_are_unavailable() {
        assert!(matches!(
            map_pg_error(sqlx::Error::PoolTimedOut, "insert"),
            StorageError::BackendUnavailable { .. }
        ));
        assert!(matches!(
            map_pg_error(sqlx::Error::PoolClosed, "select"),
            StorageError::BackendUnavailable { .. }
        ));
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            map_pg_error(sqlx::Error::Io(io), "connect"),
            StorageError::BackendUnavailable { .. }
        ));
    }

    #[test]
    fn test_commit_failure_is_unknown_outcome() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        assert!(matches!(
            map_commit_error(sqlx::Error::Io(io), "bulk_insert"),
            StorageError::UnknownOutcome { .. }
        ));
    }
}
