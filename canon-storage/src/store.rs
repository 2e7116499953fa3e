//! Authoritative entity store.
//!
//! The store is the source of truth for canonical entities. Every mutation
//! appends its change event to the feed while holding the store's write
//! lock, then publishes the new record. Readers therefore see either the
//! previous record or the new one, and any event a consumer acknowledges
//! describes a record that is already readable.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use canon_core::{
    CanonResult, ChangeDraft, Cursor, Entity, EntityId, EntityPatch, FeedError, NewEntity,
    PartitionId, Snapshot, StorageError, Version,
};
use chrono::Utc;
use tokio::sync::RwLock;

use crate::feed::ChangeFeed;

/// Async authoritative store for canonical entities.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Get an entity by ID. Tombstoned entities are returned too.
    async fn get(&self, id: EntityId) -> CanonResult<Option<Entity>>;

    /// Create a new entity at version 1.
    async fn create(&self, draft: NewEntity) -> CanonResult<Entity>;

    /// Apply a patch if the entity is still at `expected_version`.
    async fn update(
        &self,
        id: EntityId,
        patch: EntityPatch,
        expected_version: Version,
    ) -> CanonResult<Entity>;

    /// Soft-delete an entity. Tombstoning twice returns the existing record.
    async fn tombstone(&self, id: EntityId) -> CanonResult<Entity>;

    /// Every entity of a partition plus the cursor to resume the feed from.
    async fn snapshot(&self, partition: PartitionId) -> CanonResult<Snapshot>;

    /// Check if the store is reachable.
    async fn ping(&self) -> CanonResult<()>;

    /// Get store statistics.
    async fn statistics(&self) -> CanonResult<StoreStatistics>;
}

/// Store statistics for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStatistics {
    pub entity_count: u64,
    pub live_count: u64,
    pub tombstoned_count: u64,
}

/// In-memory authoritative store writing through to a change feed.
pub struct InMemoryEntityStore {
    entities: RwLock<HashMap<EntityId, Entity>>,
    feed: Arc<dyn ChangeFeed>,
}

impl InMemoryEntityStore {
    pub fn new(feed: Arc<dyn ChangeFeed>) -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            feed,
        }
    }

    pub fn feed(&self) -> &Arc<dyn ChangeFeed> {
        &self.feed
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn get(&self, id: EntityId) -> CanonResult<Option<Entity>> {
        Ok(self.entities.read().await.get(&id).cloned())
    }

    async fn create(&self, draft: NewEntity) -> CanonResult<Entity> {
        draft.validate()?;
        let id = EntityId::now_v7();
        let entity = Entity::new(
            id,
            draft,
            id.partition(self.feed.partition_count()),
            Utc::now(),
        );

        let mut entities = self.entities.write().await;
        let event = self.feed.append(ChangeDraft::created(&entity)).await?;
        entities.insert(id, entity.clone());
        drop(entities);

        tracing::debug!(
            entity_id = %id,
            partition = event.partition,
            sequence = event.sequence,
            "Entity created"
        );
        Ok(entity)
    }

    async fn update(
        &self,
        id: EntityId,
        patch: EntityPatch,
        expected_version: Version,
    ) -> CanonResult<Entity> {
        patch.validate()?;

        let mut entities = self.entities.write().await;
        let current = entities.get(&id).ok_or(StorageError::NotFound { id })?;
        if !current.is_live() {
            return Err(StorageError::Tombstoned { id }.into());
        }
        if current.version != expected_version {
            return Err(StorageError::VersionConflict {
                id,
                expected: expected_version,
                actual: current.version,
            }
            .into());
        }

        let next = current.patched(&patch, Utc::now());
        let event = self.feed.append(ChangeDraft::updated(&next)).await?;
        entities.insert(id, next.clone());
        drop(entities);

        tracing::debug!(
            entity_id = %id,
            version = next.version,
            sequence = event.sequence,
            "Entity updated"
        );
        Ok(next)
    }

    async fn tombstone(&self, id: EntityId) -> CanonResult<Entity> {
        let mut entities = self.entities.write().await;
        let current = entities.get(&id).ok_or(StorageError::NotFound { id })?;
        if !current.is_live() {
            return Ok(current.clone());
        }

        let next = current.tombstoned(Utc::now());
        let event = self.feed.append(ChangeDraft::tombstoned(&next)).await?;
        entities.insert(id, next.clone());
        drop(entities);

        tracing::debug!(
            entity_id = %id,
            version = next.version,
            sequence = event.sequence,
            "Entity tombstoned"
        );
        Ok(next)
    }

    async fn snapshot(&self, partition: PartitionId) -> CanonResult<Snapshot> {
        let partition_count = self.feed.partition_count();
        if partition >= partition_count {
            return Err(FeedError::UnknownPartition {
                partition,
                partition_count,
            }
            .into());
        }

        // Mutations append under the write lock, so while the read lock is
        // held the head matches exactly the entities collected below.
        let entities = self.entities.read().await;
        let head = self.feed.head(partition).await?;
        let mut members: Vec<Entity> = entities
            .values()
            .filter(|e| e.partition == partition)
            .cloned()
            .collect();
        drop(entities);
        members.sort_by_key(|e| e.entity_id);

        Ok(Snapshot {
            partition,
            entities: members,
            cursor: Cursor::new(partition, head),
        })
    }

    async fn ping(&self) -> CanonResult<()> {
        Ok(())
    }

    async fn statistics(&self) -> CanonResult<StoreStatistics> {
        let entities = self.entities.read().await;
        let live_count = entities.values().filter(|e| e.is_live()).count() as u64;
        let entity_count = entities.len() as u64;
        Ok(StoreStatistics {
            entity_count,
            live_count,
            tombstoned_count: entity_count - live_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::InMemoryChangeFeed;
    use canon_core::{CanonError, ChangeKind, EntityKind, EntityStatus, FeedConfig};
    use serde_json::json;

    fn store() -> (InMemoryEntityStore, Arc<InMemoryChangeFeed>) {
        let feed = Arc::new(InMemoryChangeFeed::new(&FeedConfig {
            partition_count: 4,
            ..FeedConfig::default()
        }));
        (InMemoryEntityStore::new(feed.clone()), feed)
    }

    async fn events_for(feed: &InMemoryChangeFeed, entity: &Entity) -> Vec<ChangeKind> {
        feed.read_since(Cursor::start(entity.partition), 100)
            .await
            .expect("read should succeed")
            .filter(|e| e.entity_id == entity.entity_id)
            .map(|e| e.kind)
            .collect()
    }

    #[tokio::test]
    async fn test_create_assigns_version_and_partition() {
        let (store, feed) = store();
        let entity = store
            .create(NewEntity::new(EntityKind::Asset, "Bitcoin"))
            .await
            .expect("create should succeed");

        assert_eq!(entity.version, 1);
        assert_eq!(entity.partition, entity.entity_id.partition(4));
        assert_eq!(events_for(&feed, &entity).await, vec![ChangeKind::Created]);
        assert_eq!(
            store.get(entity.entity_id).await.expect("get should succeed"),
            Some(entity)
        );
    }

    #[tokio::test]
    async fn test_update_checks_expected_version() {
        let (store, feed) = store();
        let entity = store
            .create(NewEntity::new(EntityKind::Issuer, "Acme"))
            .await
            .expect("create should succeed");
        let patch = EntityPatch {
            attributes: Some(json!({"lei": "5493001KJTIIGC8Y1R12"})),
            ..EntityPatch::default()
        };

        let updated = store
            .update(entity.entity_id, patch.clone(), 1)
            .await
            .expect("update should succeed");
        assert_eq!(updated.version, 2);

        let err = store.update(entity.entity_id, patch, 1).await.unwrap_err();
        assert!(matches!(
            err,
            CanonError::Storage(StorageError::VersionConflict { expected: 1, actual: 2, .. })
        ));
        assert_eq!(
            events_for(&feed, &entity).await,
            vec![ChangeKind::Created, ChangeKind::Updated]
        );
    }

    #[tokio::test]
    async fn test_tombstone_is_idempotent() {
        let (store, feed) = store();
        let entity = store
            .create(NewEntity::new(EntityKind::Platform, "Exchange"))
            .await
            .expect("create should succeed");

        let first = store.tombstone(entity.entity_id).await.expect("tombstone should succeed");
        let second = store.tombstone(entity.entity_id).await.expect("tombstone should succeed");
        assert_eq!(first, second);
        assert_eq!(first.status, EntityStatus::Tombstoned);
        assert_eq!(
            events_for(&feed, &entity).await,
            vec![ChangeKind::Created, ChangeKind::Tombstoned]
        );

        let err = store
            .update(entity.entity_id, EntityPatch {
                display_name: Some("x".to_string()),
                ..EntityPatch::default()
            }, first.version)
            .await
            .unwrap_err();
        assert!(matches!(err, CanonError::Storage(StorageError::Tombstoned { .. })));
    }

    #[tokio::test]
    async fn test_missing_entity() {
        let (store, _) = store();
        let id = EntityId::now_v7();
        assert_eq!(store.get(id).await.expect("get should succeed"), None);
        assert!(matches!(
            store.tombstone(id).await,
            Err(CanonError::Storage(StorageError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_invalid_draft_emits_nothing() {
        let (store, feed) = store();
        assert!(store.create(NewEntity::new(EntityKind::Asset, "")).await.is_err());
        let heads: u64 = feed
            .partitions()
            .await
            .expect("partitions")
            .iter()
            .map(|p| p.head)
            .sum();
        assert_eq!(heads, 0);
    }

    #[tokio::test]
    async fn test_snapshot_covers_partition() {
        let (store, _) = store();
        let mut created = Vec::new();
        for i in 0..12 {
            created.push(
                store
                    .create(NewEntity::new(EntityKind::Asset, format!("asset-{i}")))
                    .await
                    .expect("create should succeed"),
            );
        }

        let mut seen = 0;
        for partition in 0..4 {
            let snapshot = store.snapshot(partition).await.expect("snapshot should succeed");
            assert!(snapshot.entities.iter().all(|e| e.partition == partition));
            assert_eq!(snapshot.cursor.partition, partition);
            assert_eq!(snapshot.cursor.sequence, snapshot.entities.len() as u64);
            seen += snapshot.entities.len();
        }
        assert_eq!(seen, created.len());
        assert!(store.snapshot(4).await.is_err());
    }

    #[tokio::test]
    async fn test_statistics() {
        let (store, _) = store();
        let a = store
            .create(NewEntity::new(EntityKind::Asset, "A"))
            .await
            .expect("create should succeed");
        store
            .create(NewEntity::new(EntityKind::Asset, "B"))
            .await
            .expect("create should succeed");
        store.tombstone(a.entity_id).await.expect("tombstone should succeed");

        let stats = store.statistics().await.expect("statistics should succeed");
        assert_eq!(stats.entity_count, 2);
        assert_eq!(stats.live_count, 1);
        assert_eq!(stats.tombstoned_count, 1);
    }
}
