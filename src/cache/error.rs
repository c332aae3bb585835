//! Error types for the cache store

use crate::error::Error as CrateError;
use thiserror::Error;

/// Error type for cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// LibSQL error
    #[error("LibSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// Could not open or create the database
    #[error("Connection error: {0}")]
    Connection(String),

    /// Schema error
    #[error("Schema error: {0}")]
    Schema(String),

    /// SQL query error
    #[error("SQL query error: {0}")]
    Query(String),

    /// Stored data could not be encoded or decoded
    #[error("Data error: {0}")]
    Data(String),
}

impl From<CacheError> for CrateError {
    fn from(err: CacheError) -> Self {
        CrateError::Cache(err.to_string())
    }
}
