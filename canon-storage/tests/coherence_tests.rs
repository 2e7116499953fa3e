//! End-to-end behaviour of store, feed, registry, cache and consumer.
//!
//! **Property: no observed staleness past acknowledgment.** Once the
//! consumer has acknowledged the event for a mutation, every acknowledged
//! read returns that version or a newer one.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use canon_core::{
    CacheTier, ChangeKind, Cursor, EntityKind, ErrorKind, ExternalRef, NewEntity,
    ReadConsistency, RetryConfig,
};
use canon_storage::{CacheKey, ChangeFeed, EntityStore};
use canon_test_utils::fixtures::{fast_retry, rename, service};
use proptest::prelude::*;

// ============================================================================
// PROPERTY TESTS
// ============================================================================

#[derive(Debug, Clone)]
enum Op {
    Update(usize),
    Tombstone(usize),
    Read(usize),
    Ack,
}

fn op_strategy(entities: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..entities).prop_map(Op::Update),
        1 => (0..entities).prop_map(Op::Tombstone),
        4 => (0..entities).prop_map(Op::Read),
        2 => Just(Op::Ack),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// After each acknowledgment every acknowledged read sees the store's
    /// current version; between acknowledgments reads never go backwards.
    #[test]
    fn prop_reads_after_ack_are_current(ops in prop::collection::vec(op_strategy(4), 1..40)) {
        let rt = tokio::runtime::Runtime::new().expect("runtime should build");
        rt.block_on(async {
            let svc = service(2, 1_000, RetryConfig::disabled());
            let mut ids = Vec::new();
            for i in 0..4 {
                let e = svc
                    .store
                    .create(NewEntity::new(EntityKind::Asset, format!("asset-{i}")))
                    .await
                    .expect("create should succeed");
                ids.push(e.entity_id);
            }
            let mut last_seen = vec![0u64; ids.len()];

            for op in ops {
                match op {
                    Op::Update(i) => {
                        let current = svc.store.get(ids[i]).await.expect("get").expect("exists");
                        if current.is_live() {
                            svc.store
                                .update(ids[i], rename(format!("v{}", current.version + 1)), current.version)
                                .await
                                .expect("update should succeed");
                        }
                    }
                    Op::Tombstone(i) => {
                        svc.store.tombstone(ids[i]).await.expect("tombstone should succeed");
                    }
                    Op::Read(i) => {
                        let read = svc
                            .cache
                            .get_entity(ids[i], ReadConsistency::Acknowledged)
                            .await
                            .expect("read should succeed");
                        prop_assert!(read.version() >= last_seen[i]);
                        last_seen[i] = read.version();
                    }
                    Op::Ack => {
                        svc.consumer.drain_all().await.expect("drain should succeed");
                        for (i, id) in ids.iter().enumerate() {
                            let stored = svc.store.get(*id).await.expect("get").expect("exists");
                            let read = svc
                                .cache
                                .get_entity(*id, ReadConsistency::Acknowledged)
                                .await
                                .expect("read should succeed");
                            prop_assert_eq!(read.version(), stored.version);
                            prop_assert_eq!(read.value(), &stored);
                            last_seen[i] = read.version();
                        }
                    }
                }
            }
            Ok(())
        })?;
    }

    /// Resolving the same external reference twice without a remap in
    /// between returns the same entity.
    #[test]
    fn prop_resolution_is_stable(
        namespace in "[a-z][a-z0-9_.-]{0,15}",
        external_id in "[ -~]{1,64}",
        reads in 2usize..6,
    ) {
        let rt = tokio::runtime::Runtime::new().expect("runtime should build");
        rt.block_on(async {
            let svc = service(4, 1_000, RetryConfig::disabled());
            let e = svc
                .store
                .create(NewEntity::new(EntityKind::Issuer, "issuer"))
                .await
                .expect("create should succeed");
            let external = ExternalRef::new(namespace, external_id).expect("generated ref is valid");
            svc.registry
                .register_mapping(external.clone(), e.entity_id)
                .await
                .expect("register should succeed");

            for _ in 0..reads {
                let resolved = svc
                    .cache
                    .resolve(&external, ReadConsistency::Acknowledged)
                    .await
                    .expect("resolve should succeed");
                prop_assert_eq!(resolved.value().entity_id, e.entity_id);
            }
            Ok(())
        })?;
    }
}

// ============================================================================
// EXAMPLES
// ============================================================================

#[tokio::test]
async fn test_conflicting_registration_leaves_mapping_untouched() {
    let svc = service(4, 1_000, RetryConfig::disabled());
    let ent_1 = svc
        .store
        .create(NewEntity::new(EntityKind::Asset, "ent_1"))
        .await
        .expect("create should succeed");
    let ent_2 = svc
        .store
        .create(NewEntity::new(EntityKind::Asset, "ent_2"))
        .await
        .expect("create should succeed");
    let chain = ExternalRef::new("chain", "0xabc").expect("valid ref");

    svc.registry
        .register_mapping(chain.clone(), ent_1.entity_id)
        .await
        .expect("register should succeed");
    let heads_before = svc.feed.partitions().await.expect("partitions");

    let err = svc
        .registry
        .register_mapping(chain.clone(), ent_2.entity_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    assert_eq!(
        svc.registry.resolve(&chain).await.expect("resolve should succeed"),
        ent_1.entity_id
    );
    assert_eq!(svc.feed.partitions().await.expect("partitions"), heads_before);
    assert_eq!(svc.registry.history(&chain).await.expect("history").len(), 1);
}

#[tokio::test]
async fn test_feed_example_from_zero_and_one() {
    let svc = service(1, 1_000, RetryConfig::disabled());
    let e = svc
        .store
        .create(NewEntity::new(EntityKind::Asset, "ent_1"))
        .await
        .expect("create should succeed");
    svc.store
        .update(e.entity_id, rename("renamed"), 1)
        .await
        .expect("update should succeed");

    let all: Vec<_> = svc
        .feed
        .read_since(Cursor::start(0), 10)
        .await
        .expect("read")
        .collect();
    assert_eq!(
        all.iter().map(|ev| (ev.sequence, ev.kind)).collect::<Vec<_>>(),
        vec![(1, ChangeKind::Created), (2, ChangeKind::Updated)]
    );

    let tail: Vec<_> = svc
        .feed
        .read_since(Cursor::new(0, 1), 10)
        .await
        .expect("read")
        .collect();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].sequence, 2);

    let replay: Vec<_> = svc
        .feed
        .read_since(Cursor::start(0), 10)
        .await
        .expect("read")
        .collect();
    assert_eq!(replay, all);
}

#[tokio::test]
async fn test_snapshot_then_resume_after_expiry() {
    let svc = service(1, 3, RetryConfig::disabled());
    let e = svc
        .store
        .create(NewEntity::new(EntityKind::Network, "mainnet"))
        .await
        .expect("create should succeed");
    for v in 1..=4 {
        svc.store
            .update(e.entity_id, rename(format!("mainnet-{v}")), v)
            .await
            .expect("update should succeed");
    }

    let err = svc.feed.read_since(Cursor::start(0), 10).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CursorExpired);

    let snapshot = svc.store.snapshot(0).await.expect("snapshot should succeed");
    assert_eq!(snapshot.entities.len(), 1);
    assert_eq!(snapshot.entities[0].version, 5);

    svc.store
        .update(e.entity_id, rename("mainnet-final"), 5)
        .await
        .expect("update should succeed");
    let resumed: Vec<_> = svc
        .feed
        .read_since(snapshot.cursor, 10)
        .await
        .expect("snapshot cursor should still be readable")
        .collect();
    assert_eq!(resumed.len(), 1);
    assert_eq!(resumed[0].version, 6);
}

#[tokio::test]
async fn test_transient_store_failures_are_retried() {
    let svc = service(2, 1_000, fast_retry());
    let e = svc
        .store
        .create(NewEntity::new(EntityKind::Platform, "venue"))
        .await
        .expect("create should succeed");

    svc.store.fail_next(2);
    let read = svc
        .cache
        .get_entity(e.entity_id, ReadConsistency::Acknowledged)
        .await
        .expect("read should recover");
    assert_eq!(read.served_from(), CacheTier::Store);
    assert_eq!(svc.store.reads(), 3);
}

#[tokio::test]
async fn test_outage_longer_than_retries_is_unavailable() {
    let svc = service(2, 1_000, fast_retry());
    let e = svc
        .store
        .create(NewEntity::new(EntityKind::Platform, "venue"))
        .await
        .expect("create should succeed");

    svc.store.fail_next(10);
    let err = svc
        .cache
        .get_entity(e.entity_id, ReadConsistency::Authoritative)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
}

#[tokio::test]
async fn test_cached_data_survives_store_outage() {
    let svc = service(2, 1_000, RetryConfig::disabled());
    let e = svc
        .store
        .create(NewEntity::new(EntityKind::Asset, "cached"))
        .await
        .expect("create should succeed");
    svc.cache
        .get_entity(e.entity_id, ReadConsistency::Acknowledged)
        .await
        .expect("read should succeed");

    svc.store.fail_next(100);
    let read = svc
        .cache
        .get_entity(e.entity_id, ReadConsistency::Acknowledged)
        .await
        .expect("edge tier should serve during outage");
    assert_eq!(read.served_from(), CacheTier::Edge);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_readers_writers_and_consumer_converge() {
    let svc = Arc::new(service(4, 10_000, RetryConfig::disabled()));
    let mut ids = Vec::new();
    for i in 0..8 {
        let e = svc
            .store
            .create(NewEntity::new(EntityKind::Asset, format!("asset-{i}")))
            .await
            .expect("create should succeed");
        ids.push(e.entity_id);
    }
    let ids = Arc::new(ids);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handles = svc.consumer.spawn(shutdown_rx);

    let mut workers = Vec::new();
    for w in 0..4 {
        let svc = Arc::clone(&svc);
        let ids = Arc::clone(&ids);
        workers.push(tokio::spawn(async move {
            for round in 0..25 {
                let id = ids[(w + round) % ids.len()];
                if round % 3 == 0 {
                    let current = svc.store.get(id).await.expect("get").expect("exists");
                    // Lost races against other writers are expected.
                    let _ = svc
                        .store
                        .update(id, rename(format!("w{w}-r{round}")), current.version)
                        .await;
                } else {
                    svc.cache
                        .get_entity(id, ReadConsistency::Acknowledged)
                        .await
                        .expect("read should succeed");
                }
            }
        }));
    }
    for worker in workers {
        worker.await.expect("worker should not panic");
    }

    let caught_up = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let lags = svc.consumer.lags().await.expect("lags");
            if lags.iter().all(|l| l.lag == 0) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(caught_up.is_ok(), "consumer should catch up");

    for id in ids.iter() {
        let stored = svc.store.get(*id).await.expect("get").expect("exists");
        let read = svc
            .cache
            .get_entity(*id, ReadConsistency::Acknowledged)
            .await
            .expect("read should succeed");
        assert_eq!(read.version(), stored.version);
    }

    shutdown_tx.send(true).expect("consumers listening");
    for handle in handles {
        handle.await.expect("consumer should stop cleanly");
    }
}

#[tokio::test]
async fn test_floor_survives_outage_during_apply_then_clears() {
    let svc = service(1, 1_000, RetryConfig::disabled());
    let e = svc
        .store
        .create(NewEntity::new(EntityKind::Asset, "floored"))
        .await
        .expect("create should succeed");
    svc.store
        .update(e.entity_id, rename("floored-2"), 1)
        .await
        .expect("update should succeed");
    svc.consumer.drain_all().await.expect("drain should succeed");
    assert_eq!(svc.cache.tracked_floors(), 0);

    // The store cannot confirm version 3 while the event is applied.
    svc.store
        .update(e.entity_id, rename("floored-3"), 2)
        .await
        .expect("update should succeed");
    svc.store.fail_next(1);
    svc.consumer.drain_all().await.expect("drain should succeed");
    let key = CacheKey::Entity(e.entity_id);
    assert_eq!(svc.cache.version_floor(&key), Some(3));

    let read = svc
        .cache
        .get_entity(e.entity_id, ReadConsistency::Acknowledged)
        .await
        .expect("read should succeed");
    assert_eq!(read.version(), 3);
    assert_eq!(svc.cache.version_floor(&key), None);
    assert_eq!(svc.cache.tracked_floors(), 0);
}

#[tokio::test]
async fn test_floors_stay_empty_under_steady_writes() {
    let svc = service(4, 10_000, RetryConfig::disabled());
    let mut ids = Vec::new();
    for i in 0..64 {
        let e = svc
            .store
            .create(NewEntity::new(EntityKind::Asset, format!("steady-{i}")))
            .await
            .expect("create should succeed");
        ids.push(e.entity_id);
    }
    for round in 1..=3u64 {
        for id in &ids {
            svc.store
                .update(*id, rename(format!("steady-r{round}")), round)
                .await
                .expect("update should succeed");
        }
        svc.consumer.drain_all().await.expect("drain should succeed");
        assert_eq!(svc.cache.tracked_floors(), 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_resolve_never_older_than_acknowledged_remap() {
    let svc = Arc::new(service(4, 10_000, RetryConfig::disabled()));
    let mut targets = Vec::new();
    for i in 0..6 {
        let e = svc
            .store
            .create(NewEntity::new(EntityKind::Asset, format!("target-{i}")))
            .await
            .expect("create should succeed");
        targets.push(e.entity_id);
    }
    let external = ExternalRef::new("chain", "0xfeed").expect("valid ref");
    svc.registry
        .register_mapping(external.clone(), targets[0])
        .await
        .expect("register should succeed");
    svc.consumer.drain_all().await.expect("drain should succeed");

    let acked = Arc::new(AtomicU64::new(1));
    let done = Arc::new(AtomicBool::new(false));

    let mut resolvers = Vec::new();
    for _ in 0..3 {
        let svc = Arc::clone(&svc);
        let external = external.clone();
        let acked = Arc::clone(&acked);
        let done = Arc::clone(&done);
        resolvers.push(tokio::spawn(async move {
            loop {
                let finished = done.load(Ordering::SeqCst);
                let floor = acked.load(Ordering::SeqCst);
                let read = svc
                    .cache
                    .resolve(&external, ReadConsistency::Acknowledged)
                    .await
                    .expect("resolve should succeed");
                assert!(
                    read.version() >= floor,
                    "resolved revision {} older than acknowledged {}",
                    read.version(),
                    floor
                );
                if finished {
                    break;
                }
                tokio::task::yield_now().await;
            }
        }));
    }

    let mut current = targets[0];
    for step in 1..=40 {
        let next = targets[step % targets.len()];
        let mapping = svc
            .registry
            .remap(external.clone(), current, next)
            .await
            .expect("remap should succeed");
        svc.consumer.drain_all().await.expect("drain should succeed");
        acked.store(mapping.revision, Ordering::SeqCst);
        current = next;
        tokio::task::yield_now().await;
    }
    done.store(true, Ordering::SeqCst);

    for resolver in resolvers {
        resolver.await.expect("resolver should not panic");
    }
    let last = svc
        .cache
        .resolve(&external, ReadConsistency::Acknowledged)
        .await
        .expect("resolve should succeed");
    assert_eq!(last.value().entity_id, current);
    assert_eq!(last.version(), 41);
}
