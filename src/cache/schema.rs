//! Cache database schema

use crate::cache::error::CacheError;
use libsql::{Connection, params};

/// Create the cache table when it does not exist yet
pub async fn initialize_schema(conn: &Connection) -> Result<(), CacheError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cache_entries (
            key TEXT PRIMARY KEY NOT NULL,
            payload TEXT NOT NULL,
            fetched_at INTEGER NOT NULL,
            ttl_seconds INTEGER NOT NULL
        )",
        params![],
    )
    .await
    .map_err(|e| CacheError::Schema(format!("Failed to create cache_entries table: {}", e)))?;

    Ok(())
}
