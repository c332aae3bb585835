//! libsql-backed key-value store with expiry

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use libsql::{Connection, Database, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::cache::error::CacheError;
use crate::cache::schema;

/// A cached payload with its bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub key: String,
    pub payload: T,
    pub fetched_at: DateTime<Utc>,
    pub ttl_seconds: i64,
}

impl<T> CacheEntry<T> {
    /// Fresh while younger than its TTL
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now - self.fetched_at < ttl_delta(self.ttl_seconds)
    }
}

/// Entry counts, split by freshness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total: usize,
    pub fresh: usize,
    pub stale: usize,
}

/// Persistent cache shared by all workers.
///
/// Access is serialized through one connection behind a mutex, and every
/// write is a single upsert statement, so readers see either the previous
/// entry or the new one.
#[derive(Clone)]
pub struct CacheStore {
    _db: Arc<Database>,
    conn: Arc<Mutex<Connection>>,
    ttl_seconds: i64,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("ttl_seconds", &self.ttl_seconds)
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    /// Open or create the store at `path`
    #[instrument(skip(ttl))]
    pub async fn open(path: &Path, ttl: Duration) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                CacheError::Connection(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| CacheError::Connection(format!("Failed to open database: {}", e)))?;

        Self::from_database(db, ttl).await
    }

    /// A store that lives only as long as the process
    pub async fn in_memory(ttl: Duration) -> Result<Self, CacheError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| CacheError::Connection(format!("Failed to open database: {}", e)))?;

        Self::from_database(db, ttl).await
    }

    async fn from_database(db: Database, ttl: Duration) -> Result<Self, CacheError> {
        let conn = db
            .connect()
            .map_err(|e| CacheError::Connection(format!("Failed to connect to database: {}", e)))?;

        schema::initialize_schema(&conn).await?;

        Ok(Self {
            _db: Arc::new(db),
            conn: Arc::new(Mutex::new(conn)),
            ttl_seconds: i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX),
        })
    }

    /// TTL applied to new entries
    pub fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    /// Fresh entry for `key`, if any
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        self.get_at(key, Utc::now()).await
    }

    /// Fresh entry for `key` as of `now`.
    ///
    /// Missing, stale, unreadable and undecodable entries are all a miss. An
    /// entry must be younger than both its own TTL and the store's current TTL.
    pub async fn get_at<T: DeserializeOwned>(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Option<CacheEntry<T>> {
        let row = match self.load(key).await {
            Ok(Some(row)) => row,
            Ok(None) => return None,
            Err(e) => {
                warn!("Treating unreadable cache entry {} as a miss: {}", key, e);
                return None;
            }
        };

        let (payload, fetched_at, ttl_seconds) = row;
        let ttl_seconds = ttl_seconds.min(self.ttl_seconds);
        let fetched_at = match Utc.timestamp_millis_opt(fetched_at).single() {
            Some(at) => at,
            None => {
                warn!("Cache entry {} has an invalid timestamp", key);
                return None;
            }
        };

        if now - fetched_at >= ttl_delta(ttl_seconds) {
            debug!("Cache entry {} is stale", key);
            return None;
        }

        match serde_json::from_str(&payload) {
            Ok(payload) => Some(CacheEntry {
                key: key.to_string(),
                payload,
                fetched_at,
                ttl_seconds,
            }),
            Err(e) => {
                warn!("Treating corrupt cache entry {} as a miss: {}", key, e);
                None
            }
        }
    }

    async fn load(&self, key: &str) -> Result<Option<(String, i64, i64)>, CacheError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT payload, fetched_at, ttl_seconds FROM cache_entries WHERE key = ?",
                params![key],
            )
            .await
            .map_err(|e| CacheError::Query(format!("Failed to read cache entry: {}", e)))?;

        match rows.next().await? {
            Some(row) => Ok(Some((row.get(0)?, row.get(1)?, row.get(2)?))),
            None => Ok(None),
        }
    }

    /// Store `payload` under `key`, replacing any previous entry
    pub async fn put<T: Serialize>(&self, key: &str, payload: &T) -> Result<(), CacheError> {
        self.put_at(key, payload, Utc::now()).await
    }

    /// Store `payload` under `key` as fetched at `fetched_at`
    pub async fn put_at<T: Serialize>(
        &self,
        key: &str,
        payload: &T,
        fetched_at: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        // Serialize before taking the lock so a failure leaves the old entry untouched
        let payload = serde_json::to_string(payload)
            .map_err(|e| CacheError::Data(format!("Failed to encode payload: {}", e)))?;

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO cache_entries (key, payload, fetched_at, ttl_seconds)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
             payload = excluded.payload,
             fetched_at = excluded.fetched_at,
             ttl_seconds = excluded.ttl_seconds",
            params![key, payload, fetched_at.timestamp_millis(), self.ttl_seconds],
        )
        .await
        .map_err(|e| CacheError::Query(format!("Failed to write cache entry: {}", e)))?;

        debug!("Cached {}", key);
        Ok(())
    }

    /// Whether any entry, fresh or stale, exists for `key`
    pub async fn contains(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.load(key).await?.is_some())
    }

    /// Count entries as of `now`
    pub async fn stats_at(&self, now: DateTime<Utc>) -> Result<CacheStats, CacheError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query("SELECT fetched_at, ttl_seconds FROM cache_entries", params![])
            .await
            .map_err(|e| CacheError::Query(format!("Failed to scan cache: {}", e)))?;

        let mut stats = CacheStats::default();
        while let Some(row) = rows.next().await? {
            let fetched_at: i64 = row.get(0)?;
            let ttl_seconds: i64 = row.get(1)?;
            let fresh = Utc
                .timestamp_millis_opt(fetched_at)
                .single()
                .is_some_and(|at| now - at < ttl_delta(ttl_seconds.min(self.ttl_seconds)));

            stats.total += 1;
            if fresh {
                stats.fresh += 1;
            } else {
                stats.stale += 1;
            }
        }

        Ok(stats)
    }

    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        self.stats_at(Utc::now()).await
    }
}

fn ttl_delta(ttl_seconds: i64) -> TimeDelta {
    TimeDelta::try_seconds(ttl_seconds).unwrap_or(TimeDelta::MAX)
}
