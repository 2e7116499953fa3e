//! Two-tier coherent cache.
//!
//! A fronting edge tier (in-memory or LMDB) and a bounded LRU hot store sit
//! in front of the authoritative [`EntityStore`](crate::store::EntityStore).
//! [`CoherentCache`] owns the read path and the eviction contract; the
//! [`InvalidationConsumer`](crate::consumer::InvalidationConsumer) feeds it
//! change events.
//!
//! # Consistency model
//!
//! Reads are coherent with the change feed, not linearizable. A write becomes
//! visible through the cache once its change event has been acknowledged, so
//! staleness is bounded by event-consumption latency. After acknowledgment no
//! read returns an older version. Callers needing the latest committed state
//! ask for [`ReadConsistency::Authoritative`](canon_core::ReadConsistency).
//!
//! ```ignore
//! let read = cache.get_entity(id, ReadConsistency::Acknowledged).await?;
//! if read.was_cache_hit() {
//!     tracing::debug!(tier = %read.served_from(), staleness = ?read.staleness(), "cache hit");
//! }
//! ```

mod coherence;
mod edge;
mod gate;
mod hot_store;
mod lmdb_backend;
mod read;
mod traits;

pub use coherence::{CoherenceStats, CoherentCache};
pub use edge::{EdgeBackend, InMemoryEdgeCache};
pub use gate::KeyGate;
pub use hot_store::HotStore;
pub use lmdb_backend::{LmdbCacheError, LmdbEdgeCache};
pub use read::CacheRead;
pub use traits::{CacheBackend, CacheEntry, CacheKey, CacheStats, CacheableEntity, CachedValue};
