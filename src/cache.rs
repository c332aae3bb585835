//! Persistent scope cache
//!
//! Scope listings are stored in a local libsql database keyed by program id,
//! so repeated runs only fetch programs whose entries have expired.

pub mod error;
mod schema;
mod store;

pub use error::CacheError;
pub use store::{CacheEntry, CacheStats, CacheStore};

/// Key under which the program listing is cached
pub const PROGRAM_LIST_KEY: &str = "programs";

/// Cache key of a program's structured scope
pub fn scope_key(program_id: &str) -> String {
    format!("scope:{}", program_id)
}
