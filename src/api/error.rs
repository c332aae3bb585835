//! Error types for the API module

use crate::error::Error as CrateError;
use crate::retry::Failure;
use thiserror::Error;

/// Error surfaced by a fetch once the retry policy is done with it
#[derive(Debug, Error)]
pub enum FetchError {
    /// Credentials refused. Fatal for the run.
    #[error("Authentication rejected with status {status}: {message}")]
    Unauthorized { status: u16, message: String },

    /// Retryable failures persisted past the retry budget
    #[error("Gave up after {attempts} attempts: {reason}")]
    Exhausted { attempts: u32, reason: String },

    /// Non-retryable response such as 404
    #[error("Request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// Response body could not be decoded
    #[error("Malformed response: {0}")]
    Decode(String),

    /// The run was cancelled while this fetch was waiting
    #[error("Fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Convert the final failure of a retry loop
    pub fn from_failure(failure: Failure, attempts: u32) -> Self {
        match failure {
            Failure::Transient(reason) => FetchError::Exhausted { attempts, reason },
            Failure::RateLimited { .. } => FetchError::Exhausted {
                attempts,
                reason: "rate limited by the server".to_string(),
            },
            Failure::Fatal { status, message } => FetchError::Unauthorized { status, message },
            Failure::Rejected { status, message } => FetchError::Rejected { status, message },
            Failure::Malformed(reason) => FetchError::Decode(reason),
        }
    }

    /// Whether this error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, FetchError::Unauthorized { .. })
    }
}

impl From<FetchError> for CrateError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Unauthorized { .. } => CrateError::Auth(err.to_string()),
            FetchError::Cancelled => CrateError::Cancelled,
            _ => CrateError::Fetch(err.to_string()),
        }
    }
}
