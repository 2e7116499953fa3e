//! CANON Storage - authoritative store, identifier registry, change feed and
//! the coherent cache in front of them.
//!
//! Write path: [`EntityStore`] mutations append a [`ChangeEvent`] to the
//! [`ChangeFeed`] before becoming visible. Read path: [`CoherentCache`]
//! (edge → hot → store). The [`InvalidationConsumer`] closes the loop by
//! evicting cached keys for every event before acknowledging it.
//!
//! [`ChangeEvent`]: canon_core::ChangeEvent

pub mod cache;
pub mod consumer;
pub mod feed;
pub mod registry;
pub mod retry;
pub mod store;

pub use cache::{
    CacheBackend, CacheEntry, CacheKey, CacheRead, CacheStats, CacheableEntity, CachedValue,
    CoherenceStats, CoherentCache, EdgeBackend, HotStore, InMemoryEdgeCache, KeyGate,
    LmdbCacheError, LmdbEdgeCache,
};
pub use consumer::{
    ConsumerMetrics, ConsumerSnapshot, CursorCheckpoint, InMemoryCursorCheckpoint,
    InvalidationConsumer, PartitionLag, PollOutcome,
};
pub use feed::{ChangeBatch, ChangeFeed, InMemoryChangeFeed};
pub use registry::{IdentifierRegistry, Registration};
pub use retry::retry_with_backoff;
pub use store::{EntityStore, InMemoryEntityStore, StoreStatistics};
