//! Error types for the bountyscope crate

use thiserror::Error;

/// Result type for bountyscope operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for bountyscope operations
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Filesystem error while writing results
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The platform rejected the configured credentials. Fatal for the whole run.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// A fetch failed after the retry policy gave up
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Cache store error
    #[error("Cache error: {0}")]
    Cache(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The run was cancelled before it completed
    #[error("Run cancelled")]
    Cancelled,

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Auth(_) | Error::Cancelled | Error::Config(_))
    }
}
