//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use canon_core::CanonError;
use canon_storage::{
    ChangeFeed, CoherentCache, CursorCheckpoint, EdgeBackend, EntityStore, HotStore,
    IdentifierRegistry, InMemoryChangeFeed, InMemoryCursorCheckpoint, InMemoryEdgeCache,
    InMemoryEntityStore, InvalidationConsumer, LmdbEdgeCache,
};

use crate::config::{ApiConfig, EdgeBackendConfig};
use crate::error::ApiResult;

/// Coherent cache used by the read routes: configurable edge tier in front
/// of the LRU hot store.
pub type ApiCache = CoherentCache<EdgeBackend, HotStore>;

/// Consumer keeping [`ApiCache`] coherent with the change feed.
pub type ApiConsumer = InvalidationConsumer<EdgeBackend, HotStore>;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Authoritative store; the curation write path goes here.
    pub store: Arc<dyn EntityStore>,
    pub feed: Arc<dyn ChangeFeed>,
    pub registry: Arc<IdentifierRegistry>,
    /// Read path for entities and resolutions.
    pub cache: Arc<ApiCache>,
    pub consumer: Arc<ApiConsumer>,
    pub config: Arc<ApiConfig>,
    pub start_time: Instant,
}

impl AppState {
    /// Build the whole service in process: in-memory feed and store, the
    /// configured edge backend and the hot store.
    pub fn in_memory(config: &ApiConfig) -> ApiResult<Self> {
        let feed: Arc<dyn ChangeFeed> = Arc::new(InMemoryChangeFeed::new(&config.feed));
        let store: Arc<dyn EntityStore> = Arc::new(InMemoryEntityStore::new(feed.clone()));
        Self::from_parts(config, feed, store)
    }

    /// Build the state around an existing feed and store.
    ///
    /// The store must append its mutations to `feed`. A persistent edge
    /// tier is purged when the consumer checkpoint is not durable, since the
    /// consumer will not replay what happened while the node was down.
    pub fn from_parts(
        config: &ApiConfig,
        feed: Arc<dyn ChangeFeed>,
        store: Arc<dyn EntityStore>,
    ) -> ApiResult<Self> {
        config.validate()?;

        let checkpoint: Arc<dyn CursorCheckpoint> = Arc::new(InMemoryCursorCheckpoint::new());

        let edge = match &config.edge_backend {
            EdgeBackendConfig::Memory => EdgeBackend::Memory(InMemoryEdgeCache::with_capacity(
                config.cache.edge_ttl,
                config.cache.edge_capacity,
            )),
            EdgeBackendConfig::Lmdb { path, max_size_mb } => {
                let lmdb = LmdbEdgeCache::new(path, *max_size_mb, config.cache.edge_ttl)
                    .map_err(CanonError::from)?;
                if !checkpoint.is_durable() {
                    let discarded = lmdb.purge().map_err(CanonError::from)?;
                    if discarded > 0 {
                        tracing::warn!(
                            path = %path.display(),
                            discarded,
                            "Discarded persisted edge entries: no durable cursor to resume from"
                        );
                    }
                }
                EdgeBackend::Lmdb(lmdb)
            }
        };
        tracing::info!(edge_backend = edge.kind(), "Edge tier ready");

        let registry = Arc::new(IdentifierRegistry::new(store.clone(), feed.clone()));
        let cache = Arc::new(CoherentCache::new(
            Arc::new(edge),
            Arc::new(HotStore::new(config.cache.hot_capacity)),
            store.clone(),
            registry.clone(),
            &config.cache,
            config.retry.clone(),
        ));
        let consumer = Arc::new(InvalidationConsumer::new(
            cache.clone(),
            feed.clone(),
            checkpoint,
            config.consumer.clone(),
        ));

        Ok(Self {
            store,
            feed,
            registry,
            cache,
            consumer,
            config: Arc::new(config.clone()),
            start_time: Instant::now(),
        })
    }
}

crate::impl_from_ref!(Arc<dyn EntityStore>, store);
crate::impl_from_ref!(Arc<dyn ChangeFeed>, feed);
crate::impl_from_ref!(Arc<IdentifierRegistry>, registry);
crate::impl_from_ref!(Arc<ApiCache>, cache);
crate::impl_from_ref!(Arc<ApiConsumer>, consumer);
crate::impl_from_ref!(Arc<ApiConfig>, config);
crate::impl_from_ref!(Instant, start_time);
