//! Store error type

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors raised inside store operations.
///
/// Converted into [`vetline_core::Error`] at the crate boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Store operation '{0}' timed out")]
    Timeout(&'static str),

    #[error("Store task failed: {0}")]
    Task(String),
}

impl StoreError {
    /// Whether the error is a UNIQUE or PRIMARY KEY violation
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            StoreError::Database(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation
        )
    }
}

impl From<StoreError> for vetline_core::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => vetline_core::Error::NotFound(msg),
            StoreError::Conflict(msg) => vetline_core::Error::Conflict(msg),
            StoreError::Timeout(op) => {
                vetline_core::Error::Timeout(format!("Store operation '{}' timed out", op))
            }
            other => vetline_core::Error::Store(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maps_domain_errors() {
        let err: vetline_core::Error = StoreError::Conflict("taken".to_string()).into();
        assert_eq!(err, vetline_core::Error::Conflict("taken".to_string()));

        let err: vetline_core::Error = StoreError::Timeout("get_case").into();
        assert!(matches!(err, vetline_core::Error::Timeout(_)));

        let err: vetline_core::Error = StoreError::Corrupt("bad status".to_string()).into();
        assert!(matches!(err, vetline_core::Error::Store(_)));
    }

    #[test]
    fn test_constraint_violation_detection() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id TEXT PRIMARY KEY); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err: StoreError = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .unwrap_err()
            .into();
        assert!(err.is_constraint_violation());
        assert!(!StoreError::NotFound("x".to_string()).is_constraint_violation());
    }
}
