use axon_core::{AgentId, AxonConfig, AxonError, LoopbackHub, NullMetrics};
use axon_manager::{MemoryManager, WriteOptions};
use std::sync::Arc;
use std::time::Duration;

/// End-to-end scenarios for the AXON node stack
///
/// Every test wires real nodes over the in-process loopback transport:
/// - concurrent writes converging through last-writer-wins
/// - observed-remove set semantics under concurrent add/remove
/// - failure detection marking partitioned peers inactive
/// - shard splitting under live key accounting
/// - delta corruption rejection and recovery
/// - emergency cleanup under memory pressure
/// - the universal convergence properties

fn agent(s: &str) -> AgentId {
    AgentId::new(s)
}

fn test_config(name: &str) -> AxonConfig {
    let mut config = AxonConfig::new(name);
    config.gossip.gossip_interval = Duration::from_millis(50);
    config.gossip.sync_interval = Duration::from_millis(500);
    config.gossip.failure_threshold = 3;
    config.gossip.max_retries = 0;
    config.timeouts.send_timeout = Duration::from_millis(250);
    config
}

/// Bring up a full node: manager, inbound frame pump, background workers
fn spawn_node(
    hub: &Arc<LoopbackHub>,
    name: &str,
) -> (Arc<MemoryManager>, Vec<tokio::task::JoinHandle<()>>) {
    let (transport, mut inbound) = hub.register(agent(name));
    let manager = MemoryManager::new(
        test_config(name),
        Arc::new(transport),
        Arc::new(NullMetrics),
        None,
    )
    .unwrap();

    let mut handles = manager.run();
    let gossip = Arc::clone(manager.gossip());
    handles.push(tokio::spawn(async move {
        while let Some((from, frame)) = inbound.recv().await {
            let _ = gossip.handle_frame(&from, &frame);
        }
    }));
    (manager, handles)
}

async fn teardown(nodes: Vec<(Arc<MemoryManager>, Vec<tokio::task::JoinHandle<()>>)>) {
    for (manager, handles) in nodes {
        manager.shutdown().await;
        for handle in handles {
            let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
        }
    }
}

pub mod lww_convergence {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn concurrent_sets_converge_on_later_writer() {
        let hub = LoopbackHub::new();
        let (m1, h1) = spawn_node(&hub, "a1");
        let (m2, h2) = spawn_node(&hub, "a2");
        m1.add_peer(agent("a2"), "mem://a2");
        m2.add_peer(agent("a1"), "mem://a1");

        // Concurrent writes with no prior communication; a2's is later
        m1.put("user:1", json!({"age": 30})).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        m2.put("user:1", json!({"age": 31})).await.unwrap();

        // Exchange deltas both ways
        let d12 = m1.create_delta_sync(m2.agent()).unwrap();
        m2.apply_delta(&d12).await.unwrap();
        let d21 = m2.create_delta_sync(m1.agent()).unwrap();
        m1.apply_delta(&d21).await.unwrap();

        assert_eq!(m1.get("user:1").await.unwrap(), json!({"age": 31}));
        assert_eq!(m2.get("user:1").await.unwrap(), json!({"age": 31}));
        // The surviving write carries its author
        assert_eq!(m1.metadata_of("user:1").unwrap().source_agent, agent("a2"));
        assert_eq!(m2.metadata_of("user:1").unwrap().source_agent, agent("a2"));

        teardown(vec![(m1, h1), (m2, h2)]).await;
    }
}

pub mod or_set_semantics {
    use super::*;
    use axon_crdt::{Crdt, CrdtEntity, CrdtPayload, OrSet};

    #[tokio::test]
    async fn concurrent_add_survives_observed_remove() {
        // a1 and a2 add "x"; a1 removes having observed both adds;
        // concurrently a3 adds "x" unseen by the remove.
        let mut r1: OrSet<String> = OrSet::new();
        r1.add("x".to_string(), &agent("a1"));

        let mut r2: OrSet<String> = OrSet::new();
        r2.add("x".to_string(), &agent("a2"));

        r1.merge(&r2);
        r1.remove(&"x".to_string());

        let mut r3: OrSet<String> = OrSet::new();
        r3.add("x".to_string(), &agent("a3"));

        // Deliver in every order; all replicas agree the element lives
        let mut forward = r1.clone();
        forward.merge(&r3);
        let mut backward = r3.clone();
        backward.merge(&r1);

        assert!(forward.contains(&"x".to_string()));
        assert!(backward.contains(&"x".to_string()));
        assert_eq!(forward, backward);
    }

    #[tokio::test]
    async fn or_set_replicates_through_managers() {
        let hub = LoopbackHub::new();
        let (m1, h1) = spawn_node(&hub, "a1");
        let (m2, h2) = spawn_node(&hub, "a2");
        m1.add_peer(agent("a2"), "mem://a2");
        m2.add_peer(agent("a1"), "mem://a1");

        let mut set: OrSet<String> = OrSet::new();
        set.add("tag-a".to_string(), &agent("a1"));
        let entity = CrdtEntity::new("tags", agent("a1"), CrdtPayload::OrSet(set));
        m1.merge_crdt(entity).await.unwrap();

        let delta = m1.create_delta_sync(m2.agent()).unwrap();
        m2.apply_delta(&delta).await.unwrap();

        let replicated = m2.get_crdt("tags").unwrap();
        match replicated.payload {
            CrdtPayload::OrSet(set) => assert!(set.contains(&"tag-a".to_string())),
            other => panic!("unexpected payload: {:?}", other),
        }

        teardown(vec![(m1, h1), (m2, h2)]).await;
    }
}

pub mod failure_detection {
    use super::*;

    #[tokio::test]
    async fn silent_peer_is_marked_inactive() {
        let hub = LoopbackHub::new();
        let (m1, h1) = spawn_node(&hub, "a1");
        // a2 exists on the transport but never runs a node: its inbox
        // swallows frames, it produces no heartbeats
        let (_t2, _rx2) = hub.register(agent("a2"));
        m1.add_peer(agent("a2"), "mem://a2");

        // failure_threshold(3) checks at 3x the 50ms gossip interval,
        // plus tolerance
        tokio::time::sleep(Duration::from_millis(800)).await;

        let node = m1.gossip().node(&agent("a2")).unwrap();
        assert!(!node.active, "silent peer should be inactive");
        assert!(
            (node.reliability - 0.9).abs() < 1e-9,
            "reliability should drop by exactly 0.1, got {}",
            node.reliability
        );

        teardown(vec![(m1, h1)]).await;
    }

    #[tokio::test]
    async fn quorum_is_monotone_under_failures_and_recovery() {
        let hub = LoopbackHub::new();
        let (transport, _rx) = hub.register(agent("a1"));
        let config = test_config("a1");
        let (gossip, _events) = axon_gossip::GossipProtocol::new(
            &config,
            Arc::new(transport),
            Arc::new(NullMetrics),
        );
        for name in ["a2", "a3", "a4"] {
            gossip.add_node(agent(name), "mem://peer");
        }
        assert!(gossip.has_quorum());

        // Fail peers one at a time; quorum never flips back on while
        // failures accumulate
        let mut quorum_states = vec![gossip.has_quorum()];
        let future = chrono::Utc::now() + chrono::Duration::seconds(30);
        for _ in 0..9 {
            gossip.failure_detection_tick(future);
            quorum_states.push(gossip.has_quorum());
        }
        for window in quorum_states.windows(2) {
            assert!(window[0] || !window[1], "quorum flapped: {:?}", quorum_states);
        }
        assert!(!gossip.has_quorum());

        // Recovery: a sighting revives the peer and quorum returns
        let msg = axon_gossip::GossipMessage::new(
            agent("a2"),
            axon_crdt::VectorClock::new(agent("a2")),
            axon_gossip::GossipPayload::Heartbeat { sequence: 1 },
            1,
            axon_core::Priority::Low,
        );
        gossip.handle_message(&agent("a2"), msg).unwrap();
        let msg = axon_gossip::GossipMessage::new(
            agent("a3"),
            axon_crdt::VectorClock::new(agent("a3")),
            axon_gossip::GossipPayload::Heartbeat { sequence: 1 },
            1,
            axon_core::Priority::Low,
        );
        gossip.handle_message(&agent("a3"), msg).unwrap();
        assert!(gossip.has_quorum());
    }
}

pub mod shard_split {
    use super::*;
    use axon_core::ShardConfig;
    use axon_shard::{hash_key, MigrationStatus, ShardManager};

    #[tokio::test]
    async fn split_partitions_keys_without_double_serving() {
        let mut shards = ShardManager::new(ShardConfig::default(), 1);
        shards.add_node(agent("a1"));
        let parent = shards.init_full_range().unwrap();

        let keys: Vec<String> = (0..1000).map(|i| format!("key:{}", i)).collect();
        for key in &keys {
            shards.record_write(hash_key(key), 100).unwrap();
        }

        let outcome = shards.split_shard(parent, 1u64 << 63).unwrap();
        shards.start_migration(outcome.migration_id).unwrap();

        // Mid-migration every key is served by exactly one shard
        for key in &keys {
            let serving = shards.locate(hash_key(key)).unwrap();
            assert_eq!(serving.id, parent, "key {} double-served mid-split", key);
        }

        shards
            .tick_migration(outcome.migration_id, 50_000, 500)
            .unwrap();
        shards.complete_migration(outcome.migration_id).unwrap();
        assert_eq!(
            shards.migration(outcome.migration_id).unwrap().status,
            MigrationStatus::Completed
        );

        let snapshot = shards.snapshot();
        assert!(snapshot.partition_holds());
        assert_eq!(snapshot.active().count(), 2);

        // Accounting split the parent's 1000 keys down the middle
        let left = snapshot.shards.get(&outcome.left).unwrap();
        let right = snapshot.shards.get(&outcome.right).unwrap();
        assert_eq!(left.key_count + right.key_count, 1000);
        assert_eq!(left.key_count, 500);

        // The real hash distribution lands near 50/50 too
        let left_hashes = keys
            .iter()
            .filter(|k| left.contains(hash_key(k)))
            .count();
        assert!(
            (380..=620).contains(&left_hashes),
            "uneven split: {} keys left of the midpoint",
            left_hashes
        );

        // Every key resolves to exactly one child now
        for key in &keys {
            let serving = shards.locate(hash_key(key)).unwrap();
            assert!(serving.id == outcome.left || serving.id == outcome.right);
        }
    }
}

pub mod delta_integrity {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn corrupted_delta_is_rejected_then_recovery_converges() {
        let hub = LoopbackHub::new();
        let (m1, h1) = spawn_node(&hub, "a1");
        let (m2, h2) = spawn_node(&hub, "a2");
        m1.add_peer(agent("a2"), "mem://a2");
        m2.add_peer(agent("a1"), "mem://a1");

        m1.put("user:1", json!({"balance": 100})).await.unwrap();
        let delta = m1.create_delta_sync(m2.agent()).unwrap();

        // One flipped byte in the compressed blob
        let mut corrupted = delta.clone();
        let mid = corrupted.blob.payload.len() / 2;
        corrupted.blob.payload[mid] ^= 0x01;

        let err = m2.apply_delta(&corrupted).await.unwrap_err();
        assert!(matches!(err, AxonError::InvalidDelta { .. }));
        assert_eq!(m2.metrics().failed_syncs, 1);
        assert!(matches!(
            m2.get("user:1").await,
            Err(AxonError::NotFound { .. })
        ));

        // The intact delta still applies and the stores converge
        m2.apply_delta(&delta).await.unwrap();
        assert_eq!(m2.get("user:1").await.unwrap(), json!({"balance": 100}));

        teardown(vec![(m1, h1), (m2, h2)]).await;
    }
}

pub mod emergency_cleanup {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn cleanup_sheds_expendable_namespaces_and_compacts() {
        let hub = LoopbackHub::new();
        let (manager, handles) = spawn_node(&hub, "a1");

        for i in 0..20 {
            let opts = WriteOptions {
                priority: Some(1),
                ..Default::default()
            };
            manager
                .put_with(&format!("scratch:{}", i), json!("filler ".repeat(50)), opts)
                .await
                .unwrap();
        }
        for i in 0..20 {
            let opts = WriteOptions {
                priority: Some(9),
                ..Default::default()
            };
            manager
                .put_with(&format!("core:{}", i), json!("payload ".repeat(50)), opts)
                .await
                .unwrap();
        }

        // Shrink the budget until the node is visibly under pressure
        let used = manager.metrics().total_memory_usage;
        manager.set_memory_limit(used.saturating_add(used / 100));
        assert!(manager.memory_pressure() > 0.95);

        let before = manager.metrics().total_memory_usage;
        let report = manager.emergency_cleanup("pressure test");
        assert_eq!(report.removed_entries, 20);
        let after = manager.metrics().total_memory_usage;
        assert!(
            after <= before * 6 / 10,
            "footprint after cleanup: {} of {}",
            after,
            before
        );

        // Metrics reset, survivors intact, writes flow again
        assert_eq!(manager.metrics().writes, 0);
        assert_eq!(
            manager.get("core:0").await.unwrap(),
            json!("payload ".repeat(50))
        );
        manager.put("fresh:key", json!(1)).await.unwrap();

        teardown(vec![(manager, handles)]).await;
    }
}

pub mod universal_properties {
    use super::*;
    use axon_crdt::{laws, Crdt, GCounter, LwwRegister, OrSet, PnCounter, VectorClock};
    use proptest::prelude::*;
    use rand::seq::SliceRandom;
    use serde_json::json;

    #[test]
    fn crdt_states_converge_under_any_merge_order() {
        let mut rng = rand::thread_rng();

        let mut counters: Vec<GCounter> = (0..4)
            .map(|i| {
                let mut c = GCounter::new();
                c.increment(&agent(&format!("a{}", i)), (i + 1) as u64);
                c
            })
            .collect();
        assert!(laws::converge(&counters));

        // Merge everything into everything, in a shuffled order, twice
        let snapshot = counters.clone();
        for _ in 0..2 {
            let mut order: Vec<usize> = (0..counters.len()).collect();
            order.shuffle(&mut rng);
            for &i in &order {
                for other in &snapshot {
                    counters[i].merge(other);
                }
            }
        }
        let expected = counters[0].value();
        assert!(counters.iter().all(|c| c.value() == expected));
        assert_eq!(expected, 1 + 2 + 3 + 4);
    }

    #[test]
    fn mixed_crdt_law_suite() {
        let mut p1 = PnCounter::new();
        p1.increment(&agent("a1"), 10);
        p1.decrement(&agent("a1"), 3);
        let mut p2 = PnCounter::new();
        p2.decrement(&agent("a2"), 5);
        assert!(laws::converge(&[p1, p2]));

        let mut s1: OrSet<String> = OrSet::new();
        s1.add("x".to_string(), &agent("a1"));
        s1.remove(&"x".to_string());
        let mut s2: OrSet<String> = OrSet::new();
        s2.add("y".to_string(), &agent("a2"));
        assert!(laws::converge(&[s1, s2]));

        let mut l1: LwwRegister<i64> = LwwRegister::new();
        l1.set(1, &agent("a1"));
        let mut l2: LwwRegister<i64> = LwwRegister::new();
        l2.set(2, &agent("a2"));
        assert!(laws::converge(&[l1, l2]));
    }

    #[test]
    fn causally_ordered_events_compare_before() {
        let mut clock_a = VectorClock::new(agent("a1"));
        clock_a.increment();
        let a_snapshot = clock_a.clone();

        // B observes A, then acts: wall causality implies clock order
        let mut clock_b = VectorClock::new(agent("a2"));
        clock_b.merge(&a_snapshot);
        clock_b.increment();

        assert_eq!(
            a_snapshot.compare(&clock_b),
            axon_crdt::ClockOrdering::Before
        );
        assert_eq!(
            clock_b.compare(&a_snapshot),
            axon_crdt::ClockOrdering::After
        );
    }

    #[tokio::test]
    async fn delta_round_trip_restores_peer_state() {
        let hub = LoopbackHub::new();
        let (m1, h1) = spawn_node(&hub, "a1");
        let (m2, h2) = spawn_node(&hub, "a2");

        let keys = ["user:1", "user:2", "task:9", "cfg:main"];
        for (i, key) in keys.iter().enumerate() {
            m1.put(key, json!({"seq": i})).await.unwrap();
        }

        let delta = m1.create_delta_sync(m2.agent()).unwrap();
        let report = m2.apply_delta(&delta).await.unwrap();
        assert_eq!(report.applied, keys.len());

        for (i, key) in keys.iter().enumerate() {
            assert_eq!(m2.get(key).await.unwrap(), json!({"seq": i}));
        }

        // A second identical delta is a no-op
        let replay = m2.apply_delta(&delta).await.unwrap();
        assert_eq!(replay.applied, 0);
        assert_eq!(replay.unchanged, keys.len());

        teardown(vec![(m1, h1), (m2, h2)]).await;
    }

    #[tokio::test]
    async fn namespace_isolation_holds() {
        let hub = LoopbackHub::new();
        let (manager, handles) = spawn_node(&hub, "a1");

        manager.put("alpha:x", json!("alpha-1")).await.unwrap();
        manager.put("beta:x", json!("beta-1")).await.unwrap();

        // Mutating alpha:x leaves beta:x byte-identical and conflict-free
        manager.put("alpha:x", json!("alpha-2")).await.unwrap();
        manager.delete("alpha:x").await.unwrap();

        assert_eq!(manager.get("beta:x").await.unwrap(), json!("beta-1"));
        assert_eq!(manager.pending_conflicts(), 0);

        teardown(vec![(manager, handles)]).await;
    }

    proptest! {
        #[test]
        fn compression_round_trips_and_rejects_bit_flips(
            data in proptest::collection::vec(any::<u8>(), 1..2048),
            flip_bit in 0usize..64,
        ) {
            use axon_compress::Compressor;

            let blob = Compressor::compress_detached(&data).unwrap();
            let restored = Compressor::decompress_detached(&blob).unwrap();
            prop_assert_eq!(&restored, &data);

            // A single-bit flip mid-payload fails verification; the
            // midpoint stays clear of codec headers and padding bytes
            let mut tampered = blob.clone();
            let byte = tampered.payload.len() / 2;
            let bit = (flip_bit % 8) as u8;
            tampered.payload[byte] ^= 1 << bit;
            prop_assert!(Compressor::decompress_detached(&tampered).is_err());
        }
    }
}
