//! Striped per-key reader/writer gate.
//!
//! Reads of a key, including filling the tiers after a miss, hold the shared
//! side of the key's stripe. Invalidation holds the exclusive side while it
//! evicts, so an eviction can never interleave with a fill of the same key.
//! Unrelated keys that hash to the same stripe only contend, they never
//! observe each other.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::traits::CacheKey;

#[derive(Debug)]
pub struct KeyGate {
    stripes: Vec<RwLock<()>>,
}

impl KeyGate {
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| RwLock::new(())).collect(),
        }
    }

    fn stripe(&self, key: &CacheKey) -> &RwLock<()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() % self.stripes.len() as u64) as usize;
        &self.stripes[idx]
    }

    pub async fn read(&self, key: &CacheKey) -> RwLockReadGuard<'_, ()> {
        self.stripe(key).read().await
    }

    pub async fn write(&self, key: &CacheKey) -> RwLockWriteGuard<'_, ()> {
        self.stripe(key).write().await
    }

    /// Exclusive side of one stripe by index. Taking every stripe must go in
    /// ascending order.
    pub async fn write_stripe(&self, idx: usize) -> RwLockWriteGuard<'_, ()> {
        self.stripes[idx % self.stripes.len()].write().await
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }
}
