//! Cache backend traits and cacheable value types.
//!
//! This module defines the traits that must be implemented by cache tiers
//! and by values that can be cached.

use std::fmt;

use async_trait::async_trait;
use canon_core::{
    CacheTier, CanonResult, Entity, EntityId, ExternalRef, IdentifierMapping, Version,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Address of a cached value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheKey {
    /// An entity record, by canonical id.
    Entity(EntityId),
    /// A resolution, by external reference.
    Mapping(ExternalRef),
}

impl CacheKey {
    /// Stable byte encoding used by persistent tiers.
    ///
    /// Entity keys are `b'e'` followed by the 16 UUID bytes. Mapping keys are
    /// `b'm'`, the namespace length as one byte, the namespace and the
    /// external id. Namespaces are at most 64 bytes so the length fits.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            CacheKey::Entity(id) => {
                let mut out = Vec::with_capacity(17);
                out.push(b'e');
                out.extend_from_slice(id.as_uuid().as_bytes());
                out
            }
            CacheKey::Mapping(external) => {
                let ns = external.namespace.as_bytes();
                let ext = external.external_id.as_bytes();
                let mut out = Vec::with_capacity(2 + ns.len() + ext.len());
                out.push(b'm');
                out.push(ns.len().min(u8::MAX as usize) as u8);
                out.extend_from_slice(ns);
                out.extend_from_slice(ext);
                out
            }
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Entity(id) => write!(f, "entity/{}", id),
            CacheKey::Mapping(external) => write!(f, "mapping/{}", external),
        }
    }
}

/// A value held by a cache tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CachedValue {
    Entity(Entity),
    Mapping(IdentifierMapping),
}

/// A cached value with the version it was filled at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: CachedValue,
    pub version: Version,
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new<T: CacheableEntity>(value: T, cached_at: DateTime<Utc>) -> Self {
        Self {
            version: value.version(),
            value: value.into_cached(),
            cached_at,
        }
    }
}

/// Types that can be cached by the coherence layer.
///
/// # Implementation Requirements
///
/// - `cache_key()` must be stable for the lifetime of the value's identity
/// - `version()` must increase with every mutation that changes the value
/// - `from_cached(into_cached(x))` must return `x`
pub trait CacheableEntity: Clone + Send + Sync + 'static {
    fn cache_key(&self) -> CacheKey;

    fn version(&self) -> Version;

    fn into_cached(self) -> CachedValue;

    /// Extract this type from a cached value, or `None` if it holds another type.
    fn from_cached(value: CachedValue) -> Option<Self>;
}

impl CacheableEntity for Entity {
    fn cache_key(&self) -> CacheKey {
        CacheKey::Entity(self.entity_id)
    }

    fn version(&self) -> Version {
        self.version
    }

    fn into_cached(self) -> CachedValue {
        CachedValue::Entity(self)
    }

    fn from_cached(value: CachedValue) -> Option<Self> {
        match value {
            CachedValue::Entity(e) => Some(e),
            CachedValue::Mapping(_) => None,
        }
    }
}

impl CacheableEntity for IdentifierMapping {
    fn cache_key(&self) -> CacheKey {
        CacheKey::Mapping(self.external.clone())
    }

    fn version(&self) -> Version {
        self.revision
    }

    fn into_cached(self) -> CachedValue {
        CachedValue::Mapping(self)
    }

    fn from_cached(value: CachedValue) -> Option<Self> {
        match value {
            CachedValue::Mapping(m) => Some(m),
            CachedValue::Entity(_) => None,
        }
    }
}

/// Cache tier trait for pluggable cache implementations.
///
/// Implementations must be thread-safe. `put` must never replace an entry
/// with one carrying a lower version.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Which tier this backend serves.
    fn tier(&self) -> CacheTier;

    /// Get an entry, or `None` on a miss.
    async fn get(&self, key: &CacheKey) -> CanonResult<Option<CacheEntry>>;

    /// Store an entry. Returns `false` when a newer version was already
    /// present and the entry was dropped.
    async fn put(&self, key: CacheKey, entry: CacheEntry) -> CanonResult<bool>;

    /// Remove an entry. Returns whether anything was removed.
    async fn remove(&self, key: &CacheKey) -> CanonResult<bool>;

    /// Remove every entry. Returns the number removed.
    async fn clear(&self) -> CanonResult<u64>;

    /// Get cache statistics.
    async fn stats(&self) -> CanonResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate memory usage in bytes.
    pub memory_bytes: u64,
    /// Number of evictions due to capacity or expiry.
    pub evictions: u64,
    /// Number of entries removed by invalidation.
    pub invalidations: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
