//! Partitioned change feed.
//!
//! Every mutation of the authoritative store is appended here before it
//! becomes visible. Each partition is an independent, gapless sequence
//! starting at 1; there is no ordering across partitions.
//!
//! Readers hold a [`Cursor`] naming the last event they saw. Partitions keep
//! a bounded number of events; once a reader's cursor falls behind the
//! retention horizon the feed answers with `CursorExpired` and the reader
//! must re-snapshot.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use canon_core::{
    CanonResult, ChangeDraft, ChangeEvent, Cursor, FeedConfig, FeedError, PartitionId,
    PartitionSummary, Sequence,
};
use chrono::Utc;
use tokio::sync::{Notify, RwLock};

/// A bounded, ordered run of events read from one partition.
///
/// Events are cloned out of the feed one at a time as the batch is iterated.
/// The batch is finite: it never observes events appended after it was
/// created.
#[derive(Debug)]
pub struct ChangeBatch {
    events: std::vec::IntoIter<Arc<ChangeEvent>>,
    next_cursor: Cursor,
    has_more: bool,
}

impl ChangeBatch {
    fn new(events: Vec<Arc<ChangeEvent>>, from: Cursor, has_more: bool) -> Self {
        let next_cursor = events.last().map(|e| e.cursor()).unwrap_or(from);
        Self {
            events: events.into_iter(),
            next_cursor,
            has_more,
        }
    }

    /// Cursor after the last event of this batch. Equal to the requested
    /// cursor when the batch is empty.
    pub fn next_cursor(&self) -> Cursor {
        self.next_cursor
    }

    /// Whether the partition held more events past this batch when it was read.
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Events not yet yielded.
    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

impl Iterator for ChangeBatch {
    type Item = ChangeEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.events.next().map(|e| ChangeEvent::clone(&e))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.events.size_hint()
    }
}

impl ExactSizeIterator for ChangeBatch {}

/// Append-only partitioned log of entity mutations.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Number of partitions. Fixed for the lifetime of the feed.
    fn partition_count(&self) -> u32;

    /// Append an event, assigning the next sequence in the entity's partition.
    async fn append(&self, draft: ChangeDraft) -> CanonResult<ChangeEvent>;

    /// Read at most `limit` events strictly after `cursor`.
    async fn read_since(&self, cursor: Cursor, limit: usize) -> CanonResult<ChangeBatch>;

    /// Sequence of the newest event in a partition, 0 when empty.
    async fn head(&self, partition: PartitionId) -> CanonResult<Sequence>;

    /// Lowest sequence a cursor may carry and still be read.
    async fn horizon(&self, partition: PartitionId) -> CanonResult<Sequence>;

    /// Bounds of every partition.
    async fn partitions(&self) -> CanonResult<Vec<PartitionSummary>>;

    /// Handle woken on every append.
    fn subscribe(&self) -> Arc<Notify>;
}

#[derive(Debug, Default)]
struct PartitionLog {
    events: VecDeque<Arc<ChangeEvent>>,
    head: Sequence,
    /// Sequence of the newest pruned event.
    horizon: Sequence,
}

impl PartitionLog {
    fn summary(&self, partition: PartitionId) -> PartitionSummary {
        PartitionSummary {
            partition,
            head: self.head,
            horizon: self.horizon,
            retained: self.events.len() as u64,
        }
    }
}

/// In-process change feed.
pub struct InMemoryChangeFeed {
    partitions: Vec<RwLock<PartitionLog>>,
    retention: usize,
    notify: Arc<Notify>,
}

impl InMemoryChangeFeed {
    pub fn new(config: &FeedConfig) -> Self {
        let count = config.partition_count.max(1);
        Self {
            partitions: (0..count).map(|_| RwLock::new(PartitionLog::default())).collect(),
            retention: config.retention_per_partition.max(1),
            notify: Arc::new(Notify::new()),
        }
    }

    fn log(&self, partition: PartitionId) -> Result<&RwLock<PartitionLog>, FeedError> {
        self.partitions
            .get(partition as usize)
            .ok_or(FeedError::UnknownPartition {
                partition,
                partition_count: self.partition_count(),
            })
    }
}

impl Default for InMemoryChangeFeed {
    fn default() -> Self {
        Self::new(&FeedConfig::default())
    }
}

#[async_trait]
impl ChangeFeed for InMemoryChangeFeed {
    fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    async fn append(&self, draft: ChangeDraft) -> CanonResult<ChangeEvent> {
        let partition = draft.entity_id.partition(self.partition_count());
        let event = {
            let mut log = self.log(partition)?.write().await;
            log.head += 1;
            let event = draft.into_event(partition, log.head, Utc::now());
            log.events.push_back(Arc::new(event.clone()));
            while log.events.len() > self.retention {
                if let Some(pruned) = log.events.pop_front() {
                    log.horizon = pruned.sequence;
                }
            }
            event
        };

        tracing::trace!(
            partition,
            sequence = event.sequence,
            entity_id = %event.entity_id,
            kind = %event.kind,
            "Change event appended"
        );
        self.notify.notify_waiters();
        Ok(event)
    }

    async fn read_since(&self, cursor: Cursor, limit: usize) -> CanonResult<ChangeBatch> {
        let log = self.log(cursor.partition)?.read().await;

        if cursor.sequence < log.horizon {
            return Err(FeedError::CursorExpired {
                partition: cursor.partition,
                sequence: cursor.sequence,
                horizon: log.horizon,
            }
            .into());
        }
        if cursor.sequence > log.head {
            return Err(FeedError::CursorAhead {
                partition: cursor.partition,
                sequence: cursor.sequence,
                head: log.head,
            }
            .into());
        }

        // The event at index i carries sequence horizon + 1 + i.
        let start = (cursor.sequence - log.horizon) as usize;
        let available = log.events.len().saturating_sub(start);
        let take = available.min(limit);
        let events: Vec<_> = log.events.iter().skip(start).take(take).cloned().collect();

        Ok(ChangeBatch::new(events, cursor, available > take))
    }

    async fn head(&self, partition: PartitionId) -> CanonResult<Sequence> {
        Ok(self.log(partition)?.read().await.head)
    }

    async fn horizon(&self, partition: PartitionId) -> CanonResult<Sequence> {
        Ok(self.log(partition)?.read().await.horizon)
    }

    async fn partitions(&self) -> CanonResult<Vec<PartitionSummary>> {
        let mut summaries = Vec::with_capacity(self.partitions.len());
        for (idx, log) in self.partitions.iter().enumerate() {
            summaries.push(log.read().await.summary(idx as PartitionId));
        }
        Ok(summaries)
    }

    fn subscribe(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canon_core::{CanonError, ChangeKind, Entity, EntityId, EntityKind, NewEntity};

    fn feed(partitions: u32, retention: usize) -> InMemoryChangeFeed {
        InMemoryChangeFeed::new(&FeedConfig {
            partition_count: partitions,
            retention_per_partition: retention,
            ..FeedConfig::default()
        })
    }

    fn entity() -> Entity {
        Entity::new(
            EntityId::now_v7(),
            NewEntity::new(EntityKind::Asset, "Test"),
            0,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_created_then_updated_read_in_order() {
        let feed = feed(1, 100);
        let mut e = entity();
        feed.append(ChangeDraft::created(&e)).await.expect("append should succeed");
        e.version = 2;
        feed.append(ChangeDraft::updated(&e)).await.expect("append should succeed");

        let all: Vec<_> = feed
            .read_since(Cursor::start(0), 10)
            .await
            .expect("read should succeed")
            .collect();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].sequence, 1);
        assert_eq!(all[0].kind, ChangeKind::Created);
        assert_eq!(all[1].sequence, 2);
        assert_eq!(all[1].kind, ChangeKind::Updated);

        let tail: Vec<_> = feed
            .read_since(Cursor::new(0, 1), 10)
            .await
            .expect("read should succeed")
            .collect();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].sequence, 2);
    }

    #[tokio::test]
    async fn test_batch_reports_cursor_and_more() {
        let feed = feed(1, 100);
        let e = entity();
        for _ in 0..5 {
            feed.append(ChangeDraft::updated(&e)).await.expect("append should succeed");
        }

        let batch = feed
            .read_since(Cursor::start(0), 3)
            .await
            .expect("read should succeed");
        assert_eq!(batch.next_cursor(), Cursor::new(0, 3));
        assert!(batch.has_more());
        assert_eq!(batch.remaining(), 3);

        let batch = feed
            .read_since(Cursor::new(0, 3), 3)
            .await
            .expect("read should succeed");
        assert_eq!(batch.next_cursor(), Cursor::new(0, 5));
        assert!(!batch.has_more());

        let empty = feed
            .read_since(Cursor::new(0, 5), 3)
            .await
            .expect("read should succeed");
        assert_eq!(empty.next_cursor(), Cursor::new(0, 5));
        assert_eq!(empty.count(), 0);
    }

    #[tokio::test]
    async fn test_replay_is_identical() {
        let feed = feed(1, 100);
        let e = entity();
        for _ in 0..4 {
            feed.append(ChangeDraft::updated(&e)).await.expect("append should succeed");
        }
        let first: Vec<_> = feed.read_since(Cursor::new(0, 1), 10).await.expect("read").collect();
        let second: Vec<_> = feed.read_since(Cursor::new(0, 1), 10).await.expect("read").collect();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_retention_expires_old_cursors() {
        let feed = feed(1, 3);
        let e = entity();
        for _ in 0..5 {
            feed.append(ChangeDraft::updated(&e)).await.expect("append should succeed");
        }

        assert_eq!(feed.head(0).await.expect("head"), 5);
        assert_eq!(feed.horizon(0).await.expect("horizon"), 2);

        let err = feed.read_since(Cursor::start(0), 10).await.unwrap_err();
        assert!(matches!(
            err,
            CanonError::Feed(FeedError::CursorExpired { horizon: 2, .. })
        ));

        let tail: Vec<_> = feed.read_since(Cursor::new(0, 2), 10).await.expect("read").collect();
        assert_eq!(tail.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_cursor_ahead_and_unknown_partition() {
        let feed = feed(2, 10);
        assert!(matches!(
            feed.read_since(Cursor::new(0, 1), 10).await,
            Err(CanonError::Feed(FeedError::CursorAhead { .. }))
        ));
        assert!(matches!(
            feed.read_since(Cursor::start(7), 10).await,
            Err(CanonError::Feed(FeedError::UnknownPartition { .. }))
        ));
    }

    #[tokio::test]
    async fn test_events_land_in_entity_partition() {
        let feed = feed(8, 10);
        let e = entity();
        let event = feed.append(ChangeDraft::created(&e)).await.expect("append should succeed");
        assert_eq!(event.partition, e.entity_id.partition(8));

        let summaries = feed.partitions().await.expect("partitions");
        assert_eq!(summaries.len(), 8);
        let total: u64 = summaries.iter().map(|s| s.head).sum();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_append_wakes_subscribers() {
        let feed = Arc::new(feed(1, 10));
        let notify = feed.subscribe();
        let waiter = tokio::spawn(async move { notify.notified().await });
        tokio::task::yield_now().await;

        // Keep appending until the waiter has registered and been woken.
        let e = entity();
        for _ in 0..50 {
            feed.append(ChangeDraft::updated(&e)).await.expect("append should succeed");
            if waiter.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be woken")
            .expect("waiter task should not panic");
    }
}
