//! Edge tier.
//!
//! The edge cache fronts the hot store and is addressed by key only. Entries
//! expire after a TTL, which bounds the damage of a missed invalidation but
//! is not what keeps the tier coherent.
//!
//! The in-process tier holds at most `capacity` entries. Admitting a new key
//! into a full tier first sweeps expired entries, then drops the oldest
//! sixteenth of what remains.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use canon_core::{CacheConfig, CacheTier, CanonResult, StorageError};
use chrono::Utc;
use dashmap::DashMap;

use super::lmdb_backend::LmdbEdgeCache;
use super::traits::{CacheBackend, CacheEntry, CacheKey, CacheStats};

/// Whether an entry cached at `cached_at` has outlived `ttl`.
pub(crate) fn is_expired(entry: &CacheEntry, ttl: Duration) -> bool {
    let age = Utc::now().signed_duration_since(entry.cached_at);
    age.to_std().map(|age| age > ttl).unwrap_or(false)
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

/// In-process edge cache.
#[derive(Debug)]
pub struct InMemoryEdgeCache {
    entries: DashMap<CacheKey, CacheEntry>,
    ttl: Duration,
    capacity: usize,
    /// Serializes insertion of new keys so the capacity bound is exact.
    admission: Mutex<()>,
    counters: Counters,
}

impl InMemoryEdgeCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, CacheConfig::default().edge_capacity)
    }

    pub fn with_capacity(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            capacity: capacity.max(1),
            admission: Mutex::new(()),
            counters: Counters::default(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free at least one slot. Caller holds the admission lock.
    fn make_room(&self) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !is_expired(entry, self.ttl));
        let swept = before.saturating_sub(self.entries.len());

        let mut dropped = 0;
        if self.entries.len() >= self.capacity {
            let mut stamps: Vec<_> = self
                .entries
                .iter()
                .map(|e| (e.value().cached_at, e.key().clone()))
                .collect();
            let batch = (self.capacity / 16).clamp(1, stamps.len().max(1));
            if !stamps.is_empty() {
                stamps.select_nth_unstable_by_key(batch - 1, |(cached_at, _)| *cached_at);
            }
            for (_, key) in stamps.into_iter().take(batch) {
                if self.entries.remove(&key).is_some() {
                    dropped += 1;
                }
            }
        }

        let evicted = (swept + dropped) as u64;
        self.counters.evictions.fetch_add(evicted, Ordering::Relaxed);
        tracing::debug!(swept, dropped, capacity = self.capacity, "Edge tier made room");
    }
}

#[async_trait]
impl CacheBackend for InMemoryEdgeCache {
    fn tier(&self) -> CacheTier {
        CacheTier::Edge
    }

    async fn get(&self, key: &CacheKey) -> CanonResult<Option<CacheEntry>> {
        let found = self.entries.get(key).map(|e| e.value().clone());
        match found {
            Some(entry) if is_expired(&entry, self.ttl) => {
                self.entries
                    .remove_if(key, |_, current| current.cached_at == entry.cached_at);
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
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
        if let Some(mut current) = self.entries.get_mut(&key) {
            if current.version > entry.version {
                return Ok(false);
            }
            *current = entry;
            return Ok(true);
        }

        let _admission = self
            .admission
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            self.make_room();
        }
        let mut stored = true;
        self.entries
            .entry(key)
            .and_modify(|current| {
                if current.version > entry.version {
                    stored = false;
                } else {
                    *current = entry.clone();
                }
            })
            .or_insert_with(|| entry.clone());
        Ok(stored)
    }

    async fn remove(&self, key: &CacheKey) -> CanonResult<bool> {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        Ok(removed)
    }

    async fn clear(&self) -> CanonResult<u64> {
        let removed = self.entries.len() as u64;
        self.entries.clear();
        self.counters
            .invalidations
            .fetch_add(removed, Ordering::Relaxed);
        Ok(removed)
    }

    async fn stats(&self) -> CanonResult<CacheStats> {
        Ok(CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            entry_count: self.entries.len() as u64,
            memory_bytes: 0,
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
        })
    }
}

/// Edge tier selected by configuration.
pub enum EdgeBackend {
    Memory(InMemoryEdgeCache),
    Lmdb(LmdbEdgeCache),
}

impl EdgeBackend {
    pub fn kind(&self) -> &'static str {
        match self {
            EdgeBackend::Memory(_) => "memory",
            EdgeBackend::Lmdb(_) => "lmdb",
        }
    }
}

#[async_trait]
impl CacheBackend for EdgeBackend {
    fn tier(&self) -> CacheTier {
        CacheTier::Edge
    }

    async fn get(&self, key: &CacheKey) -> CanonResult<Option<CacheEntry>> {
        match self {
            EdgeBackend::Memory(c) => c.get(key).await,
            EdgeBackend::Lmdb(c) => c.get(key).await,
        }
    }

    async fn put(&self, key: CacheKey, entry: CacheEntry) -> CanonResult<bool> {
        match self {
            EdgeBackend::Memory(c) => c.put(key, entry).await,
            EdgeBackend::Lmdb(c) => c.put(key, entry).await,
        }
    }

    async fn remove(&self, key: &CacheKey) -> CanonResult<bool> {
        match self {
            EdgeBackend::Memory(c) => c.remove(key).await,
            EdgeBackend::Lmdb(c) => c.remove(key).await,
        }
    }

    async fn clear(&self) -> CanonResult<u64> {
        match self {
            EdgeBackend::Memory(c) => c.clear().await,
            EdgeBackend::Lmdb(c) => c.clear().await,
        }
    }

    async fn stats(&self) -> CanonResult<CacheStats> {
        match self {
            EdgeBackend::Memory(c) => c.stats().await,
            EdgeBackend::Lmdb(c) => c.stats().await,
        }
    }
}
