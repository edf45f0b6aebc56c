//! Core error types
//!
//! Every crate in the workspace surfaces failures through [`Error`]. The
//! variants follow the dispatch error taxonomy: client-caused failures
//! (`InvalidInput`, `Unauthorized`, `Forbidden`, `NotFound`, `Conflict`,
//! `TooManyRequests`) are returned as-is, collaborator failures
//! (`Unavailable`, `Timeout`) are usually absorbed by the engine, and `Store`
//! means a durable write or read could not complete.

use thiserror::Error;

/// Core error type for Vetline
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// Malformed or missing input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Missing or unusable caller identity
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Caller is known but not allowed to perform the operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Case, response or profile absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate active case, duplicate response, lost selection race or closed case
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Rate limit exceeded
    #[error("{message}")]
    TooManyRequests {
        /// Human-readable policy message
        message: String,
        /// Seconds until the current window resets
        retry_after_secs: u64,
    },

    /// Best-effort collaborator failed (maps, notifications, AI)
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Operation exceeded its time budget
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Backing store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the failure was caused by the request rather than the server
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_)
                | Error::Unauthorized(_)
                | Error::Forbidden(_)
                | Error::NotFound(_)
                | Error::Conflict(_)
                | Error::TooManyRequests { .. }
        )
    }
}

/// Result type for Vetline operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(Error::Conflict("dup".into()).is_client_error());
        assert!(Error::TooManyRequests {
            message: "slow down".into(),
            retry_after_secs: 10,
        }
        .is_client_error());
        assert!(!Error::Store("disk".into()).is_client_error());
        assert!(!Error::Timeout("store".into()).is_client_error());
    }

    #[test]
    fn test_rate_limit_message_is_policy_message() {
        let err = Error::TooManyRequests {
            message: "AI rate limit exceeded. Please wait.".into(),
            retry_after_secs: 3,
        };
        assert_eq!(err.to_string(), "AI rate limit exceeded. Please wait.");
    }
}
