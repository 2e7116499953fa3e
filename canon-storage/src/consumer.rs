//! Invalidation consumer.
//!
//! Drives the coherence layer from the change feed. Each partition is
//! consumed by its own task: read a batch after the checkpointed cursor,
//! evict every affected key, then save the new cursor. Saving the cursor is
//! the acknowledgment. A task that dies restarts from its last checkpoint, so
//! events may be applied twice but are never skipped.
//!
//! When a checkpoint falls behind the feed's retention horizon the consumer
//! can no longer tell which keys are stale. It flushes both tiers and resumes
//! from the current head.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use canon_core::{
    CanonResult, ConsumerConfig, Cursor, ErrorKind, PartitionId, Sequence,
};
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::cache::{CacheBackend, CoherentCache};
use crate::feed::ChangeFeed;

// ============================================================================
// CHECKPOINTS
// ============================================================================

/// Durable position of the consumer in each partition.
#[async_trait]
pub trait CursorCheckpoint: Send + Sync {
    /// Last acknowledged cursor for a partition, if any.
    async fn load(&self, partition: PartitionId) -> CanonResult<Option<Cursor>>;

    /// Record a cursor as acknowledged.
    async fn save(&self, cursor: Cursor) -> CanonResult<()>;

    /// Whether saved cursors outlive the process.
    ///
    /// A persistent edge tier may only be reused across restarts when this
    /// is true.
    fn is_durable(&self) -> bool;
}

#[derive(Debug, Default)]
pub struct InMemoryCursorCheckpoint {
    cursors: DashMap<PartitionId, Cursor>,
}

impl InMemoryCursorCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorCheckpoint for InMemoryCursorCheckpoint {
    async fn load(&self, partition: PartitionId) -> CanonResult<Option<Cursor>> {
        Ok(self.cursors.get(&partition).map(|c| *c))
    }

    async fn save(&self, cursor: Cursor) -> CanonResult<()> {
        self.cursors.insert(cursor.partition, cursor);
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }
}

// ============================================================================
// METRICS
// ============================================================================

#[derive(Debug, Default)]
pub struct ConsumerMetrics {
    pub events_applied: AtomicU64,
    pub batches: AtomicU64,
    pub cursor_expirations: AtomicU64,
    pub errors: AtomicU64,
}

impl ConsumerMetrics {
    pub fn snapshot(&self) -> ConsumerSnapshot {
        ConsumerSnapshot {
            events_applied: self.events_applied.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            cursor_expirations: self.cursor_expirations.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ConsumerSnapshot {
    pub events_applied: u64,
    pub batches: u64,
    pub cursor_expirations: u64,
    pub errors: u64,
}

/// Result of a single poll of one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    /// Events evicted and acknowledged by this poll.
    pub applied: usize,
    /// Checkpointed cursor after the poll.
    pub cursor: Cursor,
    /// More events were already waiting past `cursor`.
    pub has_more: bool,
    /// The checkpoint had expired and the tiers were flushed.
    pub flushed: bool,
}

/// Per-partition distance between the feed head and the checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PartitionLag {
    pub partition: PartitionId,
    pub head: Sequence,
    pub acknowledged: Sequence,
    pub lag: u64,
}

// ============================================================================
// CONSUMER
// ============================================================================

pub struct InvalidationConsumer<E, H>
where
    E: CacheBackend,
    H: CacheBackend,
{
    cache: Arc<CoherentCache<E, H>>,
    feed: Arc<dyn ChangeFeed>,
    checkpoint: Arc<dyn CursorCheckpoint>,
    config: ConsumerConfig,
    metrics: ConsumerMetrics,
}

impl<E, H> InvalidationConsumer<E, H>
where
    E: CacheBackend + 'static,
    H: CacheBackend + 'static,
{
    pub fn new(
        cache: Arc<CoherentCache<E, H>>,
        feed: Arc<dyn ChangeFeed>,
        checkpoint: Arc<dyn CursorCheckpoint>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            cache,
            feed,
            checkpoint,
            config,
            metrics: ConsumerMetrics::default(),
        }
    }

    pub fn metrics(&self) -> ConsumerSnapshot {
        self.metrics.snapshot()
    }

    async fn current(&self, partition: PartitionId) -> CanonResult<Cursor> {
        Ok(self
            .checkpoint
            .load(partition)
            .await?
            .unwrap_or_else(|| Cursor::start(partition)))
    }

    /// Apply one batch of a partition and checkpoint it.
    pub async fn poll_once(&self, partition: PartitionId) -> CanonResult<PollOutcome> {
        let cursor = self.current(partition).await?;
        let batch = match self.feed.read_since(cursor, self.config.batch_size).await {
            Ok(batch) => batch,
            Err(err) if err.kind() == ErrorKind::CursorExpired => {
                return self.recover(partition, cursor).await;
            }
            Err(err) => return Err(err),
        };

        let next = batch.next_cursor();
        let has_more = batch.has_more();
        let mut applied = 0usize;
        for event in batch {
            self.cache.apply(&event).await?;
            applied += 1;
        }

        if applied > 0 {
            self.checkpoint.save(next).await?;
            self.metrics
                .events_applied
                .fetch_add(applied as u64, Ordering::Relaxed);
            self.metrics.batches.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                partition,
                sequence = next.sequence,
                applied,
                "Acknowledged change batch"
            );
        }

        Ok(PollOutcome {
            applied,
            cursor: next,
            has_more,
            flushed: false,
        })
    }

    async fn recover(&self, partition: PartitionId, expired: Cursor) -> CanonResult<PollOutcome> {
        // Head first: everything at or below it is already visible in the
        // store, so any fill after the flush reads at least that state.
        let head = self.feed.head(partition).await?;
        self.cache.flush().await?;
        let resumed = Cursor::new(partition, head);
        self.checkpoint.save(resumed).await?;
        self.metrics.cursor_expirations.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            partition,
            expired_sequence = expired.sequence,
            resumed_sequence = head,
            "Consumer cursor expired, flushed cache and resumed from head"
        );
        Ok(PollOutcome {
            applied: 0,
            cursor: resumed,
            has_more: false,
            flushed: true,
        })
    }

    /// Poll a partition until it is caught up.
    pub async fn drain(&self, partition: PartitionId) -> CanonResult<usize> {
        let mut total = 0;
        loop {
            let outcome = self.poll_once(partition).await?;
            total += outcome.applied;
            if !outcome.has_more {
                return Ok(total);
            }
        }
    }

    /// Drain every partition once.
    pub async fn drain_all(&self) -> CanonResult<usize> {
        let mut total = 0;
        for partition in 0..self.feed.partition_count() {
            total += self.drain(partition).await?;
        }
        Ok(total)
    }

    pub async fn lag(&self, partition: PartitionId) -> CanonResult<PartitionLag> {
        let head = self.feed.head(partition).await?;
        let acknowledged = self.current(partition).await?.sequence;
        Ok(PartitionLag {
            partition,
            head,
            acknowledged,
            lag: head.saturating_sub(acknowledged),
        })
    }

    pub async fn lags(&self) -> CanonResult<Vec<PartitionLag>> {
        let mut lags = Vec::with_capacity(self.feed.partition_count() as usize);
        for partition in 0..self.feed.partition_count() {
            lags.push(self.lag(partition).await?);
        }
        Ok(lags)
    }

    /// Consume one partition until shutdown is signalled.
    pub async fn run_partition(
        self: Arc<Self>,
        partition: PartitionId,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let notify = self.feed.subscribe();
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(partition, "Invalidation consumer started");

        loop {
            // Registered before draining so an append during the drain still wakes us.
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Err(err) = self.drain(partition).await {
                self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(partition, error = %err, "Invalidation consumer poll failed");
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = &mut notified => {}
                _ = ticker.tick() => {}
            }
        }

        tracing::info!(partition, "Invalidation consumer stopped");
    }

    /// Spawn one consuming task per partition.
    pub fn spawn(self: &Arc<Self>, shutdown_rx: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        (0..self.feed.partition_count())
            .map(|partition| {
                let consumer = Arc::clone(self);
                let rx = shutdown_rx.clone();
                tokio::spawn(consumer.run_partition(partition, rx))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheKey, HotStore, InMemoryEdgeCache};
    use crate::feed::InMemoryChangeFeed;
    use crate::registry::IdentifierRegistry;
    use crate::store::{EntityStore, InMemoryEntityStore};
    use canon_core::{
        CacheConfig, EntityKind, EntityPatch, FeedConfig, NewEntity, ReadConsistency, RetryConfig,
    };
    use std::time::Duration;

    type Consumer = InvalidationConsumer<InMemoryEdgeCache, HotStore>;

    fn setup(retention: usize) -> (Arc<Consumer>, Arc<InMemoryEntityStore>) {
        let feed = Arc::new(InMemoryChangeFeed::new(&FeedConfig {
            partition_count: 1,
            retention_per_partition: retention,
            ..FeedConfig::default()
        }));
        let store = Arc::new(InMemoryEntityStore::new(feed.clone()));
        let registry = Arc::new(IdentifierRegistry::new(store.clone(), feed.clone()));
        let cache = Arc::new(CoherentCache::new(
            Arc::new(InMemoryEdgeCache::new(Duration::from_secs(60))),
            Arc::new(HotStore::new(64)),
            store.clone(),
            registry,
            &CacheConfig::default(),
            RetryConfig::disabled(),
        ));
        let consumer = InvalidationConsumer::new(
            cache,
            feed,
            Arc::new(InMemoryCursorCheckpoint::new()),
            ConsumerConfig {
                poll_interval: Duration::from_millis(10),
                batch_size: 2,
            },
        );
        (Arc::new(consumer), store)
    }

    #[tokio::test]
    async fn test_poll_applies_and_checkpoints() {
        let (consumer, store) = setup(100);
        for i in 0..3 {
            store
                .create(NewEntity::new(EntityKind::Asset, format!("a{i}")))
                .await
                .expect("create should succeed");
        }

        let first = consumer.poll_once(0).await.expect("poll should succeed");
        assert_eq!(first.applied, 2);
        assert!(first.has_more);
        assert_eq!(first.cursor.sequence, 2);

        assert_eq!(consumer.lag(0).await.expect("lag").lag, 1);
        assert_eq!(consumer.drain(0).await.expect("drain"), 1);
        assert_eq!(consumer.lag(0).await.expect("lag").lag, 0);

        // Nothing new: an idle poll acknowledges nothing.
        let idle = consumer.poll_once(0).await.expect("poll should succeed");
        assert_eq!(idle.applied, 0);
        assert_eq!(idle.cursor.sequence, 3);
        assert_eq!(consumer.metrics().events_applied, 3);
    }

    #[tokio::test]
    async fn test_expired_cursor_flushes_and_resumes_at_head() {
        let (consumer, store) = setup(2);
        let e = store
            .create(NewEntity::new(EntityKind::Asset, "BTC"))
            .await
            .expect("create should succeed");
        consumer
            .cache
            .get_entity(e.entity_id, ReadConsistency::Acknowledged)
            .await
            .expect("read");

        for v in 1..=3 {
            store
                .update(
                    e.entity_id,
                    EntityPatch {
                        display_name: Some(format!("BTC v{}", v + 1)),
                        ..EntityPatch::default()
                    },
                    v,
                )
                .await
                .expect("update should succeed");
        }

        let outcome = consumer.poll_once(0).await.expect("poll should recover");
        assert!(outcome.flushed);
        assert_eq!(outcome.cursor.sequence, 4);
        assert_eq!(consumer.metrics().cursor_expirations, 1);

        let key = CacheKey::Entity(e.entity_id);
        assert!(consumer.cache.edge().get(&key).await.expect("get").is_none());
        let read = consumer
            .cache
            .get_entity(e.entity_id, ReadConsistency::Acknowledged)
            .await
            .expect("read");
        assert_eq!(read.version(), 4);
    }

    #[tokio::test]
    async fn test_spawned_task_follows_appends_and_stops() {
        let (consumer, store) = setup(100);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = consumer.spawn(shutdown_rx);
        assert_eq!(handles.len(), 1);

        store
            .create(NewEntity::new(EntityKind::Platform, "Exchange"))
            .await
            .expect("create should succeed");

        let caught_up = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if consumer.lag(0).await.expect("lag").lag == 0
                    && consumer.metrics().events_applied == 1
                {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(caught_up.is_ok());

        shutdown_tx.send(true).expect("receivers alive");
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .expect("task should stop")
                .expect("task should not panic");
        }
    }
}
