//! CANON Test Utilities
//!
//! Centralized test infrastructure for the CANON workspace:
//! - Proptest generators for the domain types
//! - A fault-injecting store for exercising retry and outage paths
//! - An in-process service harness and common fixtures
//! - Custom assertions for CANON-specific error kinds

// Re-export core types for convenience
pub use canon_core::{
    CacheConfig, CacheTier, CanonError, CanonResult, ChangeKind, ConsumerConfig, Cursor, Entity,
    EntityId, EntityKind, EntityPatch, EntityStatus, ErrorKind, ExternalRef, FeedConfig,
    IdentifierMapping, NewEntity, PartitionId, ReadConsistency, RetryConfig, Snapshot, Version,
};

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use canon_storage::{
    CoherentCache, EntityStore, HotStore, IdentifierRegistry, InMemoryChangeFeed,
    InMemoryCursorCheckpoint, InMemoryEdgeCache, InMemoryEntityStore, InvalidationConsumer,
    StoreStatistics,
};

// ============================================================================
// FAULT-INJECTING STORE
// ============================================================================

/// Store wrapper whose reads and pings fail with `Unavailable` a set number
/// of times. Writes always reach the wrapped store.
pub struct FlakyStore {
    inner: Arc<dyn EntityStore>,
    failures_left: AtomicU32,
    reads: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn EntityStore>) -> Self {
        Self {
            inner,
            failures_left: AtomicU32::new(0),
            reads: AtomicU32::new(0),
        }
    }

    /// Fail the next `n` reads or pings.
    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Reads attempted so far, failed ones included.
    pub fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    fn outage(&self) -> CanonResult<()> {
        let consumed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        match consumed {
            Ok(_) => Err(CanonError::unavailable("simulated outage")),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl EntityStore for FlakyStore {
    async fn get(&self, id: EntityId) -> CanonResult<Option<Entity>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.outage()?;
        self.inner.get(id).await
    }

    async fn create(&self, draft: NewEntity) -> CanonResult<Entity> {
        self.inner.create(draft).await
    }

    async fn update(
        &self,
        id: EntityId,
        patch: EntityPatch,
        expected_version: Version,
    ) -> CanonResult<Entity> {
        self.inner.update(id, patch, expected_version).await
    }

    async fn tombstone(&self, id: EntityId) -> CanonResult<Entity> {
        self.inner.tombstone(id).await
    }

    async fn snapshot(&self, partition: PartitionId) -> CanonResult<Snapshot> {
        self.inner.snapshot(partition).await
    }

    async fn ping(&self) -> CanonResult<()> {
        self.outage()
    }

    async fn statistics(&self) -> CanonResult<StoreStatistics> {
        self.inner.statistics().await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating CANON domain types.

    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    /// Generate a random EntityId.
    pub fn arb_entity_id() -> impl Strategy<Value = EntityId> {
        any::<u128>().prop_map(|raw| EntityId::new(Uuid::from_u128(raw)))
    }

    /// Generate an EntityKind variant.
    pub fn arb_entity_kind() -> impl Strategy<Value = EntityKind> {
        prop_oneof![
            Just(EntityKind::Asset),
            Just(EntityKind::Issuer),
            Just(EntityKind::Platform),
            Just(EntityKind::Network),
        ]
    }

    /// Generate a non-blank display name.
    pub fn arb_display_name() -> impl Strategy<Value = String> {
        "[A-Za-z0-9][A-Za-z0-9 ._-]{0,47}"
    }

    /// Generate a small flat attribute object.
    pub fn arb_attributes() -> impl Strategy<Value = serde_json::Value> {
        prop::collection::btree_map("[a-z]{1,8}", "[a-z0-9]{0,12}", 0..4).prop_map(|map| {
            serde_json::Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::String(v)))
                    .collect(),
            )
        })
    }

    /// Generate a valid draft for a new entity.
    pub fn arb_new_entity() -> impl Strategy<Value = NewEntity> {
        (arb_entity_kind(), arb_display_name(), arb_attributes()).prop_map(
            |(kind, name, attributes)| NewEntity::new(kind, name).with_attributes(attributes),
        )
    }

    /// Generate a non-empty patch.
    pub fn arb_entity_patch() -> impl Strategy<Value = EntityPatch> {
        prop_oneof![
            arb_display_name().prop_map(|name| EntityPatch {
                display_name: Some(name),
                attributes: None,
            }),
            arb_attributes().prop_map(|attributes| EntityPatch {
                display_name: None,
                attributes: Some(attributes),
            }),
            (arb_display_name(), arb_attributes()).prop_map(|(name, attributes)| EntityPatch {
                display_name: Some(name),
                attributes: Some(attributes),
            }),
        ]
    }

    /// Generate a valid external reference.
    pub fn arb_external_ref() -> impl Strategy<Value = ExternalRef> {
        ("[a-z][a-z0-9_.-]{0,15}", "[!-~][ -~]{0,63}")
            .prop_map(|(namespace, external_id)| ExternalRef::new_unchecked(namespace, external_id))
    }

    /// Generate any cursor.
    pub fn arb_cursor() -> impl Strategy<Value = Cursor> {
        (0u32..64, any::<u64>()).prop_map(|(p, s)| Cursor::new(p, s))
    }

    /// Generate a valid feed configuration.
    pub fn arb_feed_config() -> impl Strategy<Value = FeedConfig> {
        (1u32..32, 1usize..512, 1usize..64).prop_map(|(partitions, retention, page)| FeedConfig {
            partition_count: partitions,
            retention_per_partition: retention,
            default_page_size: page,
            max_page_size: page * 4,
        })
    }

    /// Generate a valid retry configuration.
    pub fn arb_retry_config() -> impl Strategy<Value = RetryConfig> {
        (0u32..8, 1u64..100, 100u64..5_000).prop_map(|(retries, initial, max)| RetryConfig {
            max_retries: retries,
            initial_backoff: Duration::from_millis(initial),
            max_backoff: Duration::from_millis(max),
            backoff_multiplier: 2.0,
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures and an in-process service harness.

    use super::*;

    pub type TestCache = CoherentCache<InMemoryEdgeCache, HotStore>;
    pub type TestConsumer = InvalidationConsumer<InMemoryEdgeCache, HotStore>;

    /// Every component wired together in process, with the store wrapped in
    /// a [`FlakyStore`].
    pub struct TestService {
        pub feed: Arc<InMemoryChangeFeed>,
        pub store: Arc<FlakyStore>,
        pub registry: Arc<IdentifierRegistry>,
        pub cache: Arc<TestCache>,
        pub consumer: Arc<TestConsumer>,
    }

    /// Build a service with `partitions` feed partitions, each retaining
    /// `retention` events.
    pub fn service(partitions: u32, retention: usize, retry: RetryConfig) -> TestService {
        let feed = Arc::new(feed(partitions, retention));
        let inner = Arc::new(InMemoryEntityStore::new(feed.clone()));
        let store = Arc::new(FlakyStore::new(inner));
        let registry = Arc::new(IdentifierRegistry::new(store.clone(), feed.clone()));
        let cache = Arc::new(CoherentCache::new(
            Arc::new(InMemoryEdgeCache::new(Duration::from_secs(300))),
            Arc::new(HotStore::new(32)),
            store.clone(),
            registry.clone(),
            &CacheConfig::default(),
            retry,
        ));
        let consumer = Arc::new(InvalidationConsumer::new(
            cache.clone(),
            feed.clone(),
            Arc::new(InMemoryCursorCheckpoint::new()),
            fast_consumer(),
        ));
        TestService {
            feed,
            store,
            registry,
            cache,
            consumer,
        }
    }

    pub fn feed(partitions: u32, retention: usize) -> InMemoryChangeFeed {
        InMemoryChangeFeed::new(&FeedConfig {
            partition_count: partitions,
            retention_per_partition: retention,
            ..FeedConfig::default()
        })
    }

    /// Retry policy with millisecond backoff.
    pub fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            backoff_multiplier: 2.0,
        }
    }

    /// Consumer polling every few milliseconds in small batches.
    pub fn fast_consumer() -> ConsumerConfig {
        ConsumerConfig {
            poll_interval: Duration::from_millis(5),
            batch_size: 16,
        }
    }

    pub fn asset(name: &str) -> NewEntity {
        NewEntity::new(EntityKind::Asset, name)
    }

    pub fn rename(name: impl Into<String>) -> EntityPatch {
        EntityPatch {
            display_name: Some(name.into()),
            ..EntityPatch::default()
        }
    }

    /// `chain:<address>` reference used throughout the examples.
    pub fn chain_ref(address: &str) -> ExternalRef {
        ExternalRef::new_unchecked("chain", address)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for CANON results.

    use super::*;

    /// Assert that a CanonResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &CanonResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a CanonResult failed with the given kind.
    #[track_caller]
    pub fn assert_kind<T: std::fmt::Debug>(result: &CanonResult<T>, kind: ErrorKind) {
        match result {
            Err(e) => assert_eq!(e.kind(), kind, "Wrong error kind for {:?}", e),
            Ok(v) => panic!("Expected {:?} error, got Ok({:?})", kind, v),
        }
    }

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &CanonResult<T>) {
        assert_kind(result, ErrorKind::NotFound);
    }

    #[track_caller]
    pub fn assert_conflict<T: std::fmt::Debug>(result: &CanonResult<T>) {
        assert_kind(result, ErrorKind::Conflict);
    }

    #[track_caller]
    pub fn assert_cursor_expired<T: std::fmt::Debug>(result: &CanonResult<T>) {
        assert_kind(result, ErrorKind::CursorExpired);
    }

    #[track_caller]
    pub fn assert_unavailable<T: std::fmt::Debug>(result: &CanonResult<T>) {
        assert_kind(result, ErrorKind::Unavailable);
    }

    /// Assert that an entity is live at exactly `version`.
    #[track_caller]
    pub fn assert_live_at(entity: &Entity, version: Version) {
        assert_eq!(entity.status, EntityStatus::Live, "Entity should be live");
        assert_eq!(entity.version, version, "Unexpected entity version");
    }
}

// ============================================================================
// TESTS
// ============================================================================
