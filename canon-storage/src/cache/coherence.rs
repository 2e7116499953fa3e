//! Cache coherence layer.
//!
//! Reads go edge → hot → authoritative store, and a miss fills both tiers.
//! The layer is kept coherent by applying change events: for each event it
//! evicts every affected key from both tiers, and only then does the caller
//! acknowledge the event. Once an event is acknowledged no read returns data
//! older than that event's version.
//!
//! Two mechanisms make that hold under concurrency:
//!
//! - A striped [`KeyGate`]: a read (including its fill and hot→edge
//!   promotion) holds the key's shared side; eviction holds the exclusive
//!   side. A fill can therefore never land after the eviction that should
//!   have removed it.
//! - A per-key version floor, raised during eviction while the store still
//!   serves an older version. A fill carrying a version below the floor is
//!   refused and the store is read again. A floor is dropped as soon as the
//!   store is seen at or above it, so only lagging keys are tracked.
//!
//! Tier writes never replace a newer version with an older one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use canon_core::{
    CacheConfig, CacheTier, CanonError, CanonResult, ChangeEvent, ChangeKind, Entity, EntityId, ExternalRef,
    IdentifierMapping, ReadConsistency, RegistryError, RetryConfig, StorageError, Version,
};
use chrono::Utc;
use dashmap::DashMap;
use std::future::Future;

use super::gate::KeyGate;
use super::read::CacheRead;
use super::traits::{CacheBackend, CacheEntry, CacheKey, CacheStats, CacheableEntity};
use crate::registry::IdentifierRegistry;
use crate::retry::retry_with_backoff;
use crate::store::EntityStore;

/// Statistics for both tiers plus coherence counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct CoherenceStats {
    pub edge: CacheStats,
    pub hot: CacheStats,
    /// Keys evicted because of change events.
    pub invalidations: u64,
    /// Store reads refused because they were older than an acknowledged event.
    pub rejected_fills: u64,
    /// Full flushes after a cursor expired.
    pub flushes: u64,
    /// Keys whose acknowledged version the store has not yet been seen to serve.
    pub version_floors: u64,
}

/// Two-tier cache kept coherent with the authoritative store by the change feed.
pub struct CoherentCache<E, H>
where
    E: CacheBackend,
    H: CacheBackend,
{
    edge: Arc<E>,
    hot: Arc<H>,
    store: Arc<dyn EntityStore>,
    registry: Arc<IdentifierRegistry>,
    gate: KeyGate,
    floors: DashMap<CacheKey, Version>,
    retry: RetryConfig,
    invalidations: AtomicU64,
    rejected_fills: AtomicU64,
    flushes: AtomicU64,
}

impl<E, H> CoherentCache<E, H>
where
    E: CacheBackend,
    H: CacheBackend,
{
    pub fn new(
        edge: Arc<E>,
        hot: Arc<H>,
        store: Arc<dyn EntityStore>,
        registry: Arc<IdentifierRegistry>,
        config: &CacheConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            edge,
            hot,
            store,
            registry,
            gate: KeyGate::new(config.gate_stripes),
            floors: DashMap::new(),
            retry,
            invalidations: AtomicU64::new(0),
            rejected_fills: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        }
    }

    pub fn edge(&self) -> &E {
        &self.edge
    }

    pub fn hot(&self) -> &H {
        &self.hot
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<IdentifierRegistry> {
        &self.registry
    }

    /// Read an entity.
    pub async fn get_entity(
        &self,
        id: EntityId,
        consistency: ReadConsistency,
    ) -> CanonResult<CacheRead<Entity>> {
        let fetch = || self.store.get(id);
        let read = match consistency {
            ReadConsistency::Authoritative => self.read_store(fetch).await?,
            ReadConsistency::Acknowledged => {
                self.read_through(CacheKey::Entity(id), fetch).await?
            }
        };
        read.ok_or_else(|| CanonError::from(StorageError::NotFound { id }))
    }

    /// Resolve an external reference to its active mapping.
    pub async fn resolve(
        &self,
        external: &ExternalRef,
        consistency: ReadConsistency,
    ) -> CanonResult<CacheRead<IdentifierMapping>> {
        let fetch = || self.registry.mapping(external);
        let read = match consistency {
            ReadConsistency::Authoritative => self.read_store(fetch).await?,
            ReadConsistency::Acknowledged => {
                self.read_through(CacheKey::Mapping(external.clone()), fetch)
                    .await?
            }
        };
        read.ok_or_else(|| {
            CanonError::from(RegistryError::MappingNotFound {
                external: external.clone(),
            })
        })
    }

    async fn read_store<T, F, Fut>(&self, fetch: F) -> CanonResult<Option<CacheRead<T>>>
    where
        T: CacheableEntity,
        F: Fn() -> Fut,
        Fut: Future<Output = CanonResult<Option<T>>>,
    {
        let value = retry_with_backoff(&self.retry, "store_read", &fetch).await?;
        Ok(value.map(|v| {
            let version = v.version();
            CacheRead::from_store(v, version)
        }))
    }

    async fn read_through<T, F, Fut>(
        &self,
        key: CacheKey,
        fetch: F,
    ) -> CanonResult<Option<CacheRead<T>>>
    where
        T: CacheableEntity,
        F: Fn() -> Fut,
        Fut: Future<Output = CanonResult<Option<T>>>,
    {
        let _shared = self.gate.read(&key).await;

        if let Some(entry) = self.edge.get(&key).await? {
            let (version, cached_at) = (entry.version, entry.cached_at);
            if let Some(value) = T::from_cached(entry.value) {
                return Ok(Some(CacheRead::from_tier(
                    value,
                    CacheTier::Edge,
                    version,
                    cached_at,
                )));
            }
        }

        if let Some(entry) = self.hot.get(&key).await? {
            let (version, cached_at) = (entry.version, entry.cached_at);
            self.edge.put(key.clone(), entry.clone()).await?;
            if let Some(value) = T::from_cached(entry.value) {
                return Ok(Some(CacheRead::from_tier(
                    value,
                    CacheTier::Hot,
                    version,
                    cached_at,
                )));
            }
        }

        // Cannot rise during this read: floors are only raised under the
        // exclusive side of the gate.
        let floor = self.floors.get(&key).map(|f| *f);
        let rejected = &self.rejected_fills;
        let fetched = retry_with_backoff(&self.retry, "store_fill", || {
            let pending = fetch();
            async move {
                match pending.await? {
                    Some(value) if floor.is_some_and(|f| value.version() < f) => {
                        rejected.fetch_add(1, Ordering::Relaxed);
                        Err(CanonError::unavailable(
                            "store returned a version older than an acknowledged change",
                        ))
                    }
                    other => Ok(other),
                }
            }
        })
        .await?;

        let Some(value) = fetched else {
            return Ok(None);
        };
        let version = value.version();
        if floor.is_some() {
            self.floors.remove_if(&key, |_, f| *f <= version);
        }
        let entry = CacheEntry::new(value.clone(), Utc::now());
        self.hot.put(key.clone(), entry.clone()).await?;
        self.edge.put(key.clone(), entry).await?;
        tracing::trace!(key = %key, version, "Filled cache tiers from store");

        Ok(Some(CacheRead::from_store(value, version)))
    }

    /// Evict every key a change event makes stale.
    ///
    /// Returns only after both tiers have dropped the keys; callers
    /// acknowledge the event afterwards. Applying the same event twice is
    /// harmless.
    pub async fn apply(&self, event: &ChangeEvent) -> CanonResult<()> {
        // Nothing older than a creation can be cached.
        let floor = (event.kind != ChangeKind::Created).then_some(event.version);
        self.invalidate(CacheKey::Entity(event.entity_id), floor).await?;
        if let Some(previous) = event.previous_entity_id {
            self.invalidate(CacheKey::Entity(previous), None).await?;
        }
        if let Some(external) = &event.external {
            self.invalidate(CacheKey::Mapping(external.clone()), None)
                .await?;
        }
        tracing::trace!(
            entity_id = %event.entity_id,
            partition = event.partition,
            sequence = event.sequence,
            kind = %event.kind,
            "Change event applied to cache"
        );
        Ok(())
    }

    /// Evict one key from both tiers, optionally raising its version floor.
    pub async fn invalidate(&self, key: CacheKey, floor: Option<Version>) -> CanonResult<()> {
        let _exclusive = self.gate.write(&key).await;
        self.edge.remove(&key).await?;
        self.hot.remove(&key).await?;
        match (floor, &key) {
            (Some(version), CacheKey::Entity(id)) => {
                self.settle_floor(&key, *id, version).await
            }
            (Some(version), _) => self.raise_floor(&key, version),
            (None, _) => {}
        }
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Record `version` as the key's floor unless the store already serves it.
    ///
    /// Must be called under the exclusive side of the gate.
    async fn settle_floor(&self, key: &CacheKey, id: EntityId, version: Version) {
        match self.store.get(id).await {
            Ok(Some(current)) if current.version >= version => {
                self.floors.remove_if(key, |_, f| *f <= current.version);
            }
            Ok(_) => self.raise_floor(key, version),
            Err(err) => {
                tracing::debug!(
                    key = %key,
                    version,
                    error = %err,
                    "Store unreachable, keeping version floor"
                );
                self.raise_floor(key, version);
            }
        }
    }

    fn raise_floor(&self, key: &CacheKey, version: Version) {
        self.floors
            .entry(key.clone())
            .and_modify(|f| *f = (*f).max(version))
            .or_insert(version);
    }

    /// Drop everything from both tiers.
    ///
    /// Used when the change feed can no longer tell which keys are stale.
    /// Holds every stripe of the gate so no fill straddles the flush.
    pub async fn flush(&self) -> CanonResult<u64> {
        let mut guards = Vec::with_capacity(self.gate.stripe_count());
        for idx in 0..self.gate.stripe_count() {
            guards.push(self.gate.write_stripe(idx).await);
        }
        let edge = self.edge.clear().await?;
        let hot = self.hot.clear().await?;
        self.floors.clear();
        drop(guards);

        self.flushes.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(edge_entries = edge, hot_entries = hot, "Cache tiers flushed");
        Ok(edge + hot)
    }

    /// Acknowledged version the store has not yet been seen to serve.
    pub fn version_floor(&self, key: &CacheKey) -> Option<Version> {
        self.floors.get(key).map(|f| *f)
    }

    /// Keys currently carrying a version floor.
    pub fn tracked_floors(&self) -> usize {
        self.floors.len()
    }

    pub async fn stats(&self) -> CanonResult<CoherenceStats> {
        Ok(CoherenceStats {
            edge: self.edge.stats().await?,
            hot: self.hot.stats().await?,
            invalidations: self.invalidations.load(Ordering::Relaxed),
            rejected_fills: self.rejected_fills.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            version_floors: self.floors.len() as u64,
        })
    }
}
