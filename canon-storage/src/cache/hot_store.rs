//! Bounded in-memory hot tier with least-recently-used eviction.
//!
//! Recency is tracked with a monotonically increasing tick: every access
//! stamps the entry with a fresh tick, and `order` maps ticks back to keys so
//! the oldest tick is always the first entry of the map.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use canon_core::{CacheTier, CanonResult, StorageError};

use super::traits::{CacheBackend, CacheEntry, CacheKey, CacheStats};

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    tick: u64,
}

#[derive(Debug, Default)]
struct LruState {
    slots: HashMap<CacheKey, Slot>,
    order: BTreeMap<u64, CacheKey>,
    next_tick: u64,
    stats: CacheStats,
}

impl LruState {
    fn touch(&mut self, key: &CacheKey) {
        let tick = self.next_tick;
        if let Some(slot) = self.slots.get_mut(key) {
            self.order.remove(&slot.tick);
            slot.tick = tick;
            self.order.insert(tick, key.clone());
            self.next_tick += 1;
        }
    }

    fn evict_oldest(&mut self) -> Option<CacheKey> {
        let (_, key) = self.order.pop_first()?;
        self.slots.remove(&key);
        self.stats.evictions += 1;
        Some(key)
    }
}

/// LRU hot store.
#[derive(Debug)]
pub struct HotStore {
    capacity: usize,
    state: Mutex<LruState>,
}

impl HotStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(LruState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> CanonResult<usize> {
        Ok(self.lock()?.slots.len())
    }

    pub fn is_empty(&self) -> CanonResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Keys from least to most recently used.
    pub fn keys_by_recency(&self) -> CanonResult<Vec<CacheKey>> {
        Ok(self.lock()?.order.values().cloned().collect())
    }

    fn lock(&self) -> CanonResult<MutexGuard<'_, LruState>> {
        self.state
            .lock()
            .map_err(|_| StorageError::LockPoisoned.into())
    }
}

#[async_trait]
impl CacheBackend for HotStore {
    fn tier(&self) -> CacheTier {
        CacheTier::Hot
    }

    async fn get(&self, key: &CacheKey) -> CanonResult<Option<CacheEntry>> {
        let mut state = self.lock()?;
        let hit = state.slots.get(key).map(|slot| slot.entry.clone());
        match hit {
            Some(entry) => {
                state.touch(key);
                state.stats.hits += 1;
                Ok(Some(entry))
            }
            None => {
                state.stats.misses += 1;
                Ok(None)
            }
        }
    }

    async fn put(&self, key: CacheKey, entry: CacheEntry) -> CanonResult<bool> {
        let mut state = self.lock()?;

        if let Some(slot) = state.slots.get_mut(&key) {
            if slot.entry.version > entry.version {
                return Ok(false);
            }
            slot.entry = entry;
            state.touch(&key);
            return Ok(true);
        }

        while state.slots.len() >= self.capacity {
            if let Some(evicted) = state.evict_oldest() {
                tracing::trace!(key = %evicted, "Hot store evicted least recently used entry");
            } else {
                break;
            }
        }

        let tick = state.next_tick;
        state.next_tick += 1;
        state.order.insert(tick, key.clone());
        state.slots.insert(key, Slot { entry, tick });
        Ok(true)
    }

    async fn remove(&self, key: &CacheKey) -> CanonResult<bool> {
        let mut state = self.lock()?;
        match state.slots.remove(key) {
            Some(slot) => {
                state.order.remove(&slot.tick);
                state.stats.invalidations += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn clear(&self) -> CanonResult<u64> {
        let mut state = self.lock()?;
        let removed = state.slots.len() as u64;
        state.slots.clear();
        state.order.clear();
        state.stats.invalidations += removed;
        Ok(removed)
    }

    async fn stats(&self) -> CanonResult<CacheStats> {
        let state = self.lock()?;
        Ok(CacheStats {
            entry_count: state.slots.len() as u64,
            ..state.stats.clone()
        })
    }
}
