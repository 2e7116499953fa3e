//! LMDB-backed edge cache.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep the edge tier in a
//! memory-mapped file. A restarted node keeps the warm edge only when its
//! consumer resumes from a durable cursor checkpoint; otherwise the file is
//! purged on startup.
//!
//! # Value Layout
//!
//! `[cached_at millis: 8 bytes LE][version: 8 bytes LE][json CachedValue]`.
//! The version sits outside the JSON so the no-downgrade check on `put` does
//! not need to decode the stored value.
//!
//! Lookups and `stats` run in read transactions; every mutation, including
//! lazy expiry on `get`, takes a write transaction. Hit and miss counters
//! are atomics outside LMDB.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use canon_core::{CacheTier, CanonError, CanonResult, StorageError};
use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use super::edge::is_expired;
use super::traits::{CacheBackend, CacheEntry, CacheKey, CacheStats, CachedValue};

const HEADER_LEN: usize = 16;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for CanonError {
    fn from(e: LmdbCacheError) -> Self {
        CanonError::Storage(StorageError::Backend {
            reason: e.to_string(),
        })
    }
}

fn txn_err(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

fn encode_entry(entry: &CacheEntry) -> Result<Vec<u8>, LmdbCacheError> {
    let json = serde_json::to_vec(&entry.value)
        .map_err(|e| LmdbCacheError::Serialization(e.to_string()))?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + json.len());
    bytes.extend_from_slice(&entry.cached_at.timestamp_millis().to_le_bytes());
    bytes.extend_from_slice(&entry.version.to_le_bytes());
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

fn stored_version(bytes: &[u8]) -> Option<u64> {
    let raw: [u8; 8] = bytes.get(8..HEADER_LEN)?.try_into().ok()?;
    Some(u64::from_le_bytes(raw))
}

fn decode_entry(bytes: &[u8]) -> Result<CacheEntry, LmdbCacheError> {
    if bytes.len() < HEADER_LEN {
        return Err(LmdbCacheError::Deserialization("Truncated entry".into()));
    }
    let millis: [u8; 8] = bytes[0..8]
        .try_into()
        .map_err(|_| LmdbCacheError::Deserialization("Invalid timestamp".into()))?;
    let cached_at =
        DateTime::from_timestamp_millis(i64::from_le_bytes(millis)).unwrap_or_else(Utc::now);
    let version = stored_version(bytes)
        .ok_or_else(|| LmdbCacheError::Deserialization("Invalid version".into()))?;
    let value: CachedValue = serde_json::from_slice(&bytes[HEADER_LEN..])
        .map_err(|e| LmdbCacheError::Deserialization(e.to_string()))?;
    Ok(CacheEntry {
        value,
        version,
        cached_at,
    })
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

/// LMDB-backed edge cache.
///
/// # Example
///
/// ```ignore
/// use canon_storage::cache::LmdbEdgeCache;
/// use std::time::Duration;
///
/// let edge = LmdbEdgeCache::new("/var/lib/canon/edge", 256, Duration::from_secs(300))?;
/// edge.put(entity.cache_key(), CacheEntry::new(entity, Utc::now())).await?;
/// ```
pub struct LmdbEdgeCache {
    env: Env,
    db: Database<Bytes, Bytes>,
    ttl: Duration,
    counters: Counters,
}

impl LmdbEdgeCache {
    /// Open or create an LMDB edge cache.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the map in megabytes
    /// * `ttl` - Lifetime of an entry
    pub fn new<P: AsRef<Path>>(
        path: P,
        max_size_mb: usize,
        ttl: Duration,
    ) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment directory is owned by this process; no
        // other handle maps the same file with different options.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self {
            env,
            db,
            ttl,
            counters: Counters::default(),
        })
    }

    /// Drop every persisted entry and return how many there were.
    ///
    /// Called at startup when the consumer has no durable cursor to resume
    /// from, since events missed while down can no longer evict anything.
    pub fn purge(&self) -> Result<u64, LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let removed = self.db.len(&wtxn).map_err(txn_err)?;
        self.db.clear(&mut wtxn).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(removed)
    }

    fn expire(&self, encoded_key: &[u8]) -> Result<(), LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db.delete(&mut wtxn, encoded_key).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for LmdbEdgeCache {
    fn tier(&self) -> CacheTier {
        CacheTier::Edge
    }

    async fn get(&self, key: &CacheKey) -> CanonResult<Option<CacheEntry>> {
        let encoded_key = key.encode();
        let found = {
            let rtxn = self.env.read_txn().map_err(txn_err)?;
            match self.db.get(&rtxn, &encoded_key).map_err(txn_err)? {
                Some(bytes) => Some(decode_entry(bytes)?),
                None => None,
            }
        };

        match found {
            Some(entry) if is_expired(&entry, self.ttl) => {
                self.expire(&encoded_key)?;
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Some(entry) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry))
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn put(&self, key: CacheKey, entry: CacheEntry) -> CanonResult<bool> {
        let encoded_key = key.encode();
        let bytes = encode_entry(&entry)?;

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let existing = self
            .db
            .get(&wtxn, &encoded_key)
            .map_err(txn_err)?
            .and_then(stored_version);
        if existing.is_some_and(|v| v > entry.version) {
            return Ok(false);
        }
        self.db
            .put(&mut wtxn, &encoded_key, &bytes)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(true)
    }

    async fn remove(&self, key: &CacheKey) -> CanonResult<bool> {
        let encoded_key = key.encode();
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let deleted = self.db.delete(&mut wtxn, &encoded_key).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        if deleted {
            self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        Ok(deleted)
    }

    async fn clear(&self) -> CanonResult<u64> {
        let removed = self.purge()?;
        self.counters
            .invalidations
            .fetch_add(removed, Ordering::Relaxed);
        Ok(removed)
    }

    async fn stats(&self) -> CanonResult<CacheStats> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let entry_count = self.db.len(&rtxn).map_err(txn_err)?;
        let memory_bytes = self
            .env
            .real_disk_size()
            .map_err(txn_err)?;
        Ok(CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            entry_count,
            memory_bytes,
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
        })
    }
}
