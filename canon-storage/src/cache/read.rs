//! Read results carrying provenance.
//!
//! Every read through the coherence layer reports which tier served it, the
//! version it saw and when that version was cached, so callers can surface
//! the staleness they accepted.

use std::time::Duration;

use canon_core::{CacheTier, Version};
use chrono::{DateTime, Utc};

/// Result of a cache read, carrying provenance metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead<T> {
    value: T,
    served_from: CacheTier,
    version: Version,
    /// When this value was cached (or fetched from the store).
    cached_at: DateTime<Utc>,
}

impl<T> CacheRead<T> {
    /// A hit in one of the cache tiers.
    pub fn from_tier(value: T, tier: CacheTier, version: Version, cached_at: DateTime<Utc>) -> Self {
        Self {
            value,
            served_from: tier,
            version,
            cached_at,
        }
    }

    /// A value fetched from the authoritative store.
    pub fn from_store(value: T, version: Version) -> Self {
        Self {
            value,
            served_from: CacheTier::Store,
            version,
            cached_at: Utc::now(),
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn served_from(&self) -> CacheTier {
        self.served_from
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn cached_at(&self) -> DateTime<Utc> {
        self.cached_at
    }

    pub fn was_cache_hit(&self) -> bool {
        self.served_from != CacheTier::Store
    }

    /// How long ago the value was cached. Zero for store reads.
    pub fn staleness(&self) -> Duration {
        let now = Utc::now();
        if now > self.cached_at {
            (now - self.cached_at).to_std().unwrap_or(Duration::ZERO)
        } else {
            Duration::ZERO
        }
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            served_from: self.served_from,
            version: self.version,
            cached_at: self.cached_at,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_read_is_not_a_hit() {
        let read = CacheRead::from_store(42, 3);
        assert!(!read.was_cache_hit());
        assert_eq!(read.served_from(), CacheTier::Store);
        assert_eq!(read.version(), 3);
        assert!(read.staleness() < Duration::from_secs(1));
    }

    #[test]
    fn test_tier_read_reports_staleness() {
        let cached_at = Utc::now() - chrono::Duration::seconds(30);
        let read = CacheRead::from_tier("v", CacheTier::Hot, 1, cached_at);
        assert!(read.was_cache_hit());
        assert!(read.staleness() >= Duration::from_secs(29));
    }

    #[test]
    fn test_map_preserves_metadata() {
        let cached_at = Utc::now();
        let read = CacheRead::from_tier(2, CacheTier::Edge, 7, cached_at).map(|v| v * 10);
        assert_eq!(*read.value(), 20);
        assert_eq!(read.served_from(), CacheTier::Edge);
        assert_eq!(read.version(), 7);
        assert_eq!(read.cached_at(), cached_at);
    }

    #[test]
    fn test_future_cached_at_is_not_stale() {
        let read = CacheRead::from_tier((), CacheTier::Edge, 1, Utc::now() + chrono::Duration::seconds(5));
        assert_eq!(read.staleness(), Duration::ZERO);
    }
}
