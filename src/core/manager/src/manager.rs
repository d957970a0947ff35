use crate::{
    build_delta, open_delta, partition_balance, plan_propagation, AgentProfile, ContextUpdate,
    DeltaPackage, ManagerMetrics, NamespaceOp, NamespacePolicy, NamespaceRegistry,
    PropagationOptions, TopologyInputs, TopologySnapshot, WorkloadPattern,
};
use axon_compress::{CompressedBlob, Compressor};
use axon_core::{
    metric_names, AgentId, AxonConfig, AxonError, AxonResult, ConflictStrategyKind, MetricEvent,
    MetricsSink, PersistenceSink, Priority, PriorityClassifier, Transport,
};
use axon_conflict::{ConflictContext, ConflictResolver, ResolutionRule};
use axon_crdt::{
    namespace_of, ClockOrdering, CrdtEntity, EntryMetadata, MemoryEntry, Operation, OperationKind,
    OperationLog, SyncReport, VectorClock,
};
use axon_gossip::{GossipEvent, GossipProtocol};
use axon_shard::{hash_key, ShardManager};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Cadence of the maintenance loop (TTL sweep, pruning, pressure checks)
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(1);
/// Values above this size get packed during emergency compaction
const PACK_THRESHOLD: usize = 64;
/// Pressure level that triggers automatic emergency cleanup
const PRESSURE_LIMIT: f64 = 0.95;
/// Default memory budget; hosts override via `set_memory_limit`
const DEFAULT_MEMORY_LIMIT: u64 = 256 * 1024 * 1024;

/// Options for a write
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub role: String,
    pub priority: Option<u8>,
    pub ttl: Option<Duration>,
    pub content_type: Option<String>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            role: "agent".to_string(),
            priority: None,
            ttl: None,
            content_type: None,
        }
    }
}

/// What applying one remote operation did locally
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Ignored,
    ConflictResolved,
    ManualReview,
}

/// Result of an emergency cleanup pass
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub removed_entries: usize,
    pub packed_entries: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

/// Store slot: the entry, plus its packed form after compaction
///
/// When `packed` is set the entry's value field holds `Null` and the real
/// value lives in the blob; `get` unpacks transparently.
#[derive(Debug, Clone)]
struct StoredEntry {
    entry: MemoryEntry,
    packed: Option<CompressedBlob>,
}

impl StoredEntry {
    fn footprint(&self) -> u64 {
        match &self.packed {
            Some(blob) => (self.entry.key.len() + blob.payload.len()) as u64,
            None => self.entry.size_bytes() as u64,
        }
    }
}

/// The distributed memory manager: one per agent process
///
/// Owns every subsystem exclusively. Gossip reports upward through an
/// event channel registered at construction; nothing below holds a
/// reference back to the manager.
pub struct MemoryManager {
    config: AxonConfig,
    agent: AgentId,
    store: DashMap<String, StoredEntry>,
    crdts: DashMap<String, CrdtEntity>,
    clock: Mutex<VectorClock>,
    oplog: Mutex<OperationLog>,
    resolver: Mutex<ConflictResolver>,
    compressor: Mutex<Compressor>,
    shards: Mutex<ShardManager>,
    gossip: Arc<GossipProtocol>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<GossipEvent>>>,
    namespaces: RwLock<NamespaceRegistry>,
    classifier: PriorityClassifier,
    profiles: DashMap<AgentId, AgentProfile>,
    /// Last convergence vector per peer; persisted in snapshots
    sync_vectors: DashMap<AgentId, VectorClock>,
    applied_deltas: DashMap<Uuid, chrono::DateTime<Utc>>,
    last_delta_to: DashMap<AgentId, Uuid>,
    delta_seq: AtomicU64,
    subscribers: DashMap<String, usize>,
    usage_bytes: AtomicU64,
    memory_limit: AtomicU64,
    metrics: Mutex<ManagerMetrics>,
    metrics_sink: Arc<dyn MetricsSink>,
    persistence: Option<Arc<dyn PersistenceSink>>,
    topology: Mutex<Arc<TopologySnapshot>>,
    cancel: CancellationToken,
}

impl MemoryManager {
    pub fn new(
        config: AxonConfig,
        transport: Arc<dyn Transport>,
        metrics_sink: Arc<dyn MetricsSink>,
        persistence: Option<Arc<dyn PersistenceSink>>,
    ) -> AxonResult<Arc<Self>> {
        config.validate()?;
        let agent = config.agent_id.clone();

        let (gossip, event_rx) = GossipProtocol::new(&config, transport, metrics_sink.clone());

        let mut shards = ShardManager::new(
            config.sharding.clone(),
            config.topology.replication_factor,
        );
        shards.add_node(agent.clone());
        shards.init_full_range()?;

        let manager = Arc::new(Self {
            agent: agent.clone(),
            clock: Mutex::new(VectorClock::new(agent.clone())),
            oplog: Mutex::new(OperationLog::new(agent.clone())),
            resolver: Mutex::new(ConflictResolver::new(agent.clone(), config.conflict.clone())),
            compressor: Mutex::new(Compressor::new()),
            shards: Mutex::new(shards),
            gossip,
            event_rx: Mutex::new(Some(event_rx)),
            namespaces: RwLock::new(NamespaceRegistry::new()),
            classifier: PriorityClassifier::default(),
            store: DashMap::new(),
            crdts: DashMap::new(),
            profiles: DashMap::new(),
            sync_vectors: DashMap::new(),
            applied_deltas: DashMap::new(),
            last_delta_to: DashMap::new(),
            delta_seq: AtomicU64::new(0),
            subscribers: DashMap::new(),
            usage_bytes: AtomicU64::new(0),
            memory_limit: AtomicU64::new(DEFAULT_MEMORY_LIMIT),
            metrics: Mutex::new(ManagerMetrics::default()),
            metrics_sink,
            persistence,
            topology: Mutex::new(Arc::new(TopologySnapshot::build(
                config.topology.topology_type,
                vec![agent],
                1,
            ))),
            cancel: CancellationToken::new(),
            config,
        });
        info!(agent = %manager.agent, "memory manager created");
        Ok(manager)
    }

    pub fn agent(&self) -> &AgentId {
        &self.agent
    }

    pub fn gossip(&self) -> &Arc<GossipProtocol> {
        &self.gossip
    }

    pub fn topology(&self) -> Arc<TopologySnapshot> {
        Arc::clone(&self.topology.lock().expect("topology lock"))
    }

    pub fn set_memory_limit(&self, bytes: u64) {
        self.memory_limit.store(bytes.max(1), Ordering::Relaxed);
    }

    // ---------------------------------------------------------------
    // Membership and namespaces
    // ---------------------------------------------------------------

    pub fn add_peer(&self, agent: AgentId, address: impl Into<String>) {
        self.gossip.add_node(agent.clone(), address);
        self.shards.lock().expect("shards lock").add_node(agent.clone());
        self.profiles
            .entry(agent.clone())
            .or_insert_with(|| AgentProfile::new(agent));
        self.refresh_topology();
    }

    pub fn remove_peer(&self, agent: &AgentId) {
        self.gossip.remove_node(agent);
        self.shards.lock().expect("shards lock").remove_node(agent);
        self.profiles.remove(agent);
        self.refresh_topology();
    }

    pub fn update_profile(&self, profile: AgentProfile) {
        self.profiles.insert(profile.agent.clone(), profile);
    }

    /// Configure a namespace policy; its conflict strategy becomes a
    /// high-priority resolver rule for keys under that prefix
    pub fn configure_namespace(&self, namespace: impl Into<String>, policy: NamespacePolicy) {
        let namespace = namespace.into();
        if let Some(strategy) = policy.conflict_strategy {
            self.resolver
                .lock()
                .expect("resolver lock")
                .add_rule(ResolutionRule {
                    name: format!("namespace:{}", namespace),
                    key_pattern: format!("{}:*", namespace),
                    conditions: vec![],
                    strategy,
                    custom_name: None,
                    priority: 100,
                });
        }
        self.namespaces
            .write()
            .expect("namespaces lock")
            .insert(namespace, policy);
    }

    pub fn subscribe(&self, namespace: impl Into<String>) {
        *self.subscribers.entry(namespace.into()).or_insert(0) += 1;
    }

    pub fn unsubscribe(&self, namespace: &str) {
        if let Some(mut count) = self.subscribers.get_mut(namespace) {
            *count = count.saturating_sub(1);
        }
    }

    // ---------------------------------------------------------------
    // Application API
    // ---------------------------------------------------------------

    pub async fn put(&self, key: &str, value: Value) -> AxonResult<()> {
        self.put_with(key, value, WriteOptions::default()).await
    }

    /// Write a key: local store update, clock tick, oplog append, gossip
    ///
    /// Permission failures and backpressure reject before any state
    /// mutates, so a failed put leaves nothing to roll back and emits no
    /// replication traffic.
    pub async fn put_with(&self, key: &str, value: Value, opts: WriteOptions) -> AxonResult<()> {
        let namespace = namespace_of(key).to_string();
        self.namespaces
            .read()
            .expect("namespaces lock")
            .check(&namespace, &opts.role, NamespaceOp::Write)?;

        let policy_ttl = self
            .namespaces
            .read()
            .expect("namespaces lock")
            .policy_for(&namespace)
            .default_ttl;

        let clock_snapshot = {
            let mut clock = self.clock.lock().expect("clock lock");
            clock.increment();
            clock.clone()
        };

        let mut metadata = EntryMetadata::new(key, self.agent.clone());
        if let Some(priority) = opts.priority {
            metadata.priority = priority.min(10);
        }
        metadata.ttl = opts.ttl.or(policy_ttl);
        metadata.content_type = opts.content_type;
        metadata.checksum = Some(
            blake3::hash(&serde_json::to_vec(&value).unwrap_or_default())
                .to_hex()
                .to_string(),
        );

        let op = Operation::new(
            OperationKind::Set,
            key,
            Some(value.clone()),
            clock_snapshot.clone(),
            self.agent.clone(),
            metadata.clone(),
        );

        // Reserve queue space first: a backpressured put mutates nothing
        self.gossip
            .propagate_update(vec![op.clone()], self.gossip_priority(key, metadata.priority))?;

        let entry = MemoryEntry::new(key, value, clock_snapshot, metadata);
        self.commit_entry(entry);
        self.append_to_log(op).await;

        let mut metrics = self.metrics.lock().expect("metrics lock");
        metrics.writes += 1;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> AxonResult<Value> {
        self.get_as(key, "agent").await
    }

    pub async fn get_as(&self, key: &str, role: &str) -> AxonResult<Value> {
        let namespace = namespace_of(key).to_string();
        self.namespaces
            .read()
            .expect("namespaces lock")
            .check(&namespace, role, NamespaceOp::Read)?;

        let now = Utc::now();
        let (expired, value) = match self.store.get(key) {
            None => {
                return Err(AxonError::NotFound {
                    key: key.to_string(),
                })
            }
            Some(stored) => {
                if stored.entry.is_expired(now) {
                    (true, Value::Null)
                } else {
                    (false, self.unpack(&stored)?)
                }
            }
        };

        if expired {
            self.evict(key);
            return Err(AxonError::NotFound {
                key: key.to_string(),
            });
        }

        self.metrics.lock().expect("metrics lock").reads += 1;
        Ok(value)
    }

    pub async fn delete(&self, key: &str) -> AxonResult<()> {
        self.delete_as(key, "agent").await
    }

    pub async fn delete_as(&self, key: &str, role: &str) -> AxonResult<()> {
        let namespace = namespace_of(key).to_string();
        self.namespaces
            .read()
            .expect("namespaces lock")
            .check(&namespace, role, NamespaceOp::Delete)?;

        if !self.store.contains_key(key) {
            return Err(AxonError::NotFound {
                key: key.to_string(),
            });
        }

        let clock_snapshot = {
            let mut clock = self.clock.lock().expect("clock lock");
            clock.increment();
            clock.clone()
        };
        let metadata = EntryMetadata::new(key, self.agent.clone());
        let op = Operation::new(
            OperationKind::Delete,
            key,
            None,
            clock_snapshot,
            self.agent.clone(),
            metadata,
        );

        self.gossip
            .propagate_update(vec![op.clone()], self.gossip_priority(key, 5))?;
        self.evict(key);
        self.append_to_log(op).await;
        Ok(())
    }

    /// Merge a replicated CRDT entity into the local registry
    pub async fn merge_crdt(&self, entity: CrdtEntity) -> AxonResult<()> {
        let id = entity.id.clone();
        match self.crdts.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                slot.get_mut().merge(&entity)?;
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(entity.clone());
            }
        }

        let clock_snapshot = {
            let mut clock = self.clock.lock().expect("clock lock");
            clock.increment();
            clock.clone()
        };
        let metadata = EntryMetadata::new(&id, self.agent.clone());
        let op = Operation::new(
            OperationKind::Merge,
            id.clone(),
            Some(serde_json::to_value(&entity)?),
            clock_snapshot,
            self.agent.clone(),
            metadata,
        );
        self.gossip
            .propagate_update(vec![op.clone()], Priority::Medium)?;
        self.append_to_log(op).await;
        Ok(())
    }

    pub fn get_crdt(&self, id: &str) -> Option<CrdtEntity> {
        self.crdts.get(id).map(|e| e.value().clone())
    }

    /// Metadata of a stored entry, without touching read counters
    pub fn metadata_of(&self, key: &str) -> Option<EntryMetadata> {
        self.store.get(key).map(|s| s.entry.metadata.clone())
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    // ---------------------------------------------------------------
    // Delta synchronization
    // ---------------------------------------------------------------

    /// Package everything `target` has not confirmed into a delta
    pub fn create_delta_sync(&self, target: &AgentId) -> AxonResult<DeltaPackage> {
        let since = self
            .sync_vectors
            .get(target)
            .map(|v| v.value().clone())
            .unwrap_or_else(|| VectorClock::new(self.agent.clone()));
        let operations = self
            .oplog
            .lock()
            .expect("oplog lock")
            .operations_since(&since);

        let dependencies = self
            .last_delta_to
            .get(target)
            .map(|id| vec![*id])
            .unwrap_or_default();
        let version = self.delta_seq.fetch_add(1, Ordering::Relaxed);
        let delta = build_delta(
            self.agent.clone(),
            target.clone(),
            version,
            &operations,
            dependencies,
        )?;
        self.last_delta_to.insert(target.clone(), delta.delta_id);
        self.metrics.lock().expect("metrics lock").syncs += 1;
        debug!(target = %target, ops = operations.len(), "delta package created");
        Ok(delta)
    }

    /// Verify and apply a delta from a peer
    ///
    /// Integrity failures reject the whole package: `failed_syncs` grows
    /// and a fresh sync request goes back to the sender, but the local
    /// store is untouched.
    pub async fn apply_delta(&self, delta: &DeltaPackage) -> AxonResult<SyncReport> {
        let missing_dependency = delta
            .dependencies
            .iter()
            .find(|dep| !self.applied_deltas.contains_key(dep));
        let opened = match missing_dependency {
            Some(dep) => Err(AxonError::InvalidDelta {
                delta_id: delta.delta_id.to_string(),
                reason: format!("dependency {} not applied", dep),
            }),
            None => open_delta(delta),
        };

        let operations = match opened {
            Ok(operations) => operations,
            Err(error) => {
                self.metrics.lock().expect("metrics lock").failed_syncs += 1;
                // Divergence recovery runs out-of-band
                let _ = self.gossip.request_sync(&delta.source).await;
                warn!(delta = %delta.delta_id, %error, "delta rejected");
                return Err(error);
            }
        };

        let deadline = std::time::Instant::now() + self.config.timeouts.delta_apply_timeout;
        let mut report = SyncReport::default();
        for op in &operations {
            if std::time::Instant::now() > deadline {
                return Err(AxonError::Timeout {
                    timeout_ms: self.config.timeouts.delta_apply_timeout.as_millis() as u64,
                });
            }
            match self.apply_operation(op) {
                ApplyOutcome::Applied => report.applied += 1,
                ApplyOutcome::Ignored => report.unchanged += 1,
                ApplyOutcome::ConflictResolved | ApplyOutcome::ManualReview => {
                    report.conflicts += 1
                }
            }
        }
        // Remote operations join the log so later deltas relay them
        self.oplog
            .lock()
            .expect("oplog lock")
            .synchronize_with(&operations);

        // Record what the source has now confirmed shipping to us
        let mut source_vector = self
            .sync_vectors
            .entry(delta.source.clone())
            .or_insert_with(|| VectorClock::new(self.agent.clone()));
        for op in &operations {
            source_vector.merge(&op.clock);
        }
        let converged = source_vector.clone();
        drop(source_vector);
        self.oplog
            .lock()
            .expect("oplog lock")
            .mark_converged(&converged);

        self.applied_deltas.insert(delta.delta_id, Utc::now());

        let latency_ms = Utc::now()
            .signed_duration_since(delta.timestamp)
            .num_milliseconds()
            .max(0) as f64;
        {
            let mut metrics = self.metrics.lock().expect("metrics lock");
            metrics.syncs += 1;
            metrics.sync_latency.record(latency_ms);
        }
        self.metrics_sink
            .record(MetricEvent::new(metric_names::SYNC_LATENCY, latency_ms));
        Ok(report)
    }

    /// Apply one remote operation under the key's store lock
    pub fn apply_operation(&self, op: &Operation) -> ApplyOutcome {
        self.clock.lock().expect("clock lock").merge(&op.clock);

        match op.kind {
            OperationKind::Merge => {
                if let Some(value) = &op.value {
                    if let Ok(entity) = serde_json::from_value::<CrdtEntity>(value.clone()) {
                        match self.crdts.entry(entity.id.clone()) {
                            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                                if slot.get_mut().merge(&entity).is_err() {
                                    return ApplyOutcome::Ignored;
                                }
                            }
                            dashmap::mapref::entry::Entry::Vacant(slot) => {
                                slot.insert(entity);
                            }
                        }
                        return ApplyOutcome::Applied;
                    }
                }
                ApplyOutcome::Ignored
            }
            OperationKind::Delete => {
                let decision = match self.store.get(&op.key) {
                    None => ApplyOutcome::Ignored,
                    Some(stored) => match op.clock.compare(&stored.entry.clock) {
                        ClockOrdering::After => ApplyOutcome::Applied,
                        ClockOrdering::Before | ClockOrdering::Equal => ApplyOutcome::Ignored,
                        ClockOrdering::Concurrent => {
                            // Concurrent delete vs write: the later wall
                            // clock wins, matching lww elsewhere
                            if op.timestamp > stored.entry.updated_at {
                                ApplyOutcome::Applied
                            } else {
                                ApplyOutcome::Ignored
                            }
                        }
                    },
                };
                if decision == ApplyOutcome::Applied {
                    self.evict(&op.key);
                }
                decision
            }
            OperationKind::Set | OperationKind::ConflictResolve => self.apply_set(op),
        }
    }

    fn apply_set(&self, op: &Operation) -> ApplyOutcome {
        let Some(value) = op.value.clone() else {
            return ApplyOutcome::Ignored;
        };
        let mut remote = MemoryEntry::new(op.key.clone(), value, op.clock.clone(), op.metadata.clone());
        remote.updated_at = op.timestamp;

        let existing = self.store.get(&op.key).map(|s| s.entry.clone());
        match existing {
            None => {
                self.commit_entry(remote);
                ApplyOutcome::Applied
            }
            Some(local) => match op.clock.compare(&local.clock) {
                ClockOrdering::Before | ClockOrdering::Equal => ApplyOutcome::Ignored,
                ClockOrdering::After => {
                    let mut merged = remote;
                    merged.clock.merge(&local.clock);
                    self.commit_entry(merged);
                    ApplyOutcome::Applied
                }
                ClockOrdering::Concurrent => self.resolve_concurrent(local, remote),
            },
        }
    }

    fn resolve_concurrent(&self, local: MemoryEntry, remote: MemoryEntry) -> ApplyOutcome {
        let key = local.key.clone();
        let mut merged_clock = local.clock.clone();
        merged_clock.merge(&remote.clock);
        let latest = local.updated_at.max(remote.updated_at);
        let (local_value, local_meta) = (local.value.clone(), local.metadata.clone());
        let (remote_value, remote_meta) = (remote.value.clone(), remote.metadata.clone());

        let ctx = ConflictContext::new(local, remote);
        let resolution = match self.resolver.lock().expect("resolver lock").resolve(&ctx) {
            Ok(resolution) => resolution,
            Err(error) => {
                warn!(key = %key, %error, "conflict resolution failed; local value retained");
                return ApplyOutcome::Ignored;
            }
        };

        if resolution.requires_manual_review {
            // Local value stays until an operator decides
            self.metrics_sink
                .record(MetricEvent::new(metric_names::CONFLICT_MANUAL, 1.0));
            return ApplyOutcome::ManualReview;
        }

        let value = match (&resolution.resolved_value, &resolution.alternative_values) {
            (Some(value), _) => value.clone(),
            // mvr keeps every sibling; the entry holds the sibling set
            (None, Some(siblings)) => Value::Array(siblings.clone()),
            (None, None) => return ApplyOutcome::Ignored,
        };

        // Metadata follows the winning side; synthesized merges keep local
        let metadata = if value == remote_value && value != local_value {
            remote_meta
        } else {
            local_meta
        };

        let mut winner = MemoryEntry::new(key, value, merged_clock, metadata);
        winner.updated_at = latest;
        self.commit_entry(winner);

        self.metrics_sink
            .record(MetricEvent::new(metric_names::CONFLICT_RESOLVED, 1.0));
        ApplyOutcome::ConflictResolved
    }

    // ---------------------------------------------------------------
    // Context propagation
    // ---------------------------------------------------------------

    /// Push a context update to the most relevant peers via delta sync
    pub async fn propagate_context(
        &self,
        update: &ContextUpdate,
        options: &PropagationOptions,
    ) -> AxonResult<Vec<AgentId>> {
        let profiles: Vec<AgentProfile> = self.profiles.iter().map(|p| p.value().clone()).collect();
        let targets = plan_propagation(&profiles, update, options, Utc::now());

        let namespace = options.namespace.as_deref().unwrap_or("context");
        let mut delivered = Vec::with_capacity(targets.len());
        for target in targets {
            let clock_snapshot = {
                let mut clock = self.clock.lock().expect("clock lock");
                clock.increment();
                clock.clone()
            };
            let key = format!("{}:{}:{}", namespace, target.agent, Uuid::new_v4());
            let metadata = EntryMetadata::new(&key, self.agent.clone());
            let op = Operation::new(
                OperationKind::Set,
                key,
                Some(serde_json::to_value(&target.update)?),
                clock_snapshot,
                self.agent.clone(),
                metadata,
            );
            match self.gossip.send_sync_response(&target.agent, vec![op]).await {
                Ok(()) => delivered.push(target.agent),
                Err(error) => {
                    warn!(peer = %target.agent, %error, "context delivery failed")
                }
            }
        }
        Ok(delivered)
    }

    // ---------------------------------------------------------------
    // Topology
    // ---------------------------------------------------------------

    /// Re-derive the connection set for the current membership
    fn refresh_topology(&self) {
        let mut nodes: Vec<AgentId> = self.gossip.nodes().into_iter().map(|n| n.agent).collect();
        nodes.push(self.agent.clone());
        let mut topology = self.topology.lock().expect("topology lock");
        let next = TopologySnapshot::build(
            topology.topology_type,
            nodes,
            topology.version + 1,
        );
        *topology = Arc::new(next);
    }

    /// Pick and atomically apply the best topology for current conditions
    ///
    /// In-flight gossip drains on the old connection set before the new
    /// snapshot is published, so the change is atomic as observed by the
    /// application.
    pub async fn optimize_topology(&self, workload: WorkloadPattern) -> axon_core::TopologyType {
        let inputs = TopologyInputs {
            agent_count: self.gossip.nodes().len() + 1,
            average_latency_ms: self
                .metrics
                .lock()
                .expect("metrics lock")
                .sync_latency
                .avg_ms(),
            memory_pressure: self.memory_pressure(),
            consistency: self.config.topology.consistency_level,
            network_partitions: 0,
            workload,
        };
        let selected = crate::select_topology(&inputs);

        // Drain pending traffic on the old connection set
        while self.gossip.pending_len() > 0 {
            self.gossip.dispatch_once().await;
        }

        let mut nodes: Vec<AgentId> = self.gossip.nodes().into_iter().map(|n| n.agent).collect();
        nodes.push(self.agent.clone());
        let mut topology = self.topology.lock().expect("topology lock");
        let next = TopologySnapshot::build(selected, nodes, topology.version + 1);
        *topology = Arc::new(next);
        info!(topology = %selected, "topology applied");
        selected
    }

    // ---------------------------------------------------------------
    // Pressure and cleanup
    // ---------------------------------------------------------------

    pub fn memory_pressure(&self) -> f64 {
        let used = self.usage_bytes.load(Ordering::Relaxed) as f64;
        let limit = self.memory_limit.load(Ordering::Relaxed) as f64;
        (used / limit).min(1.0)
    }

    /// Shed load: drop expendable namespaces, pack what remains, reset
    /// volatile metrics
    ///
    /// Safe to call repeatedly; a second pass finds nothing left to do.
    pub fn emergency_cleanup(&self, reason: &str) -> CleanupReport {
        let mut report = CleanupReport {
            bytes_before: self.usage_bytes.load(Ordering::Relaxed),
            ..Default::default()
        };
        warn!(%reason, pressure = self.memory_pressure(), "emergency cleanup");

        // 1. Expendable entries: priority <= 1 in subscriber-less namespaces
        let victims: Vec<String> = self
            .store
            .iter()
            .filter(|stored| {
                stored.entry.metadata.priority <= 1
                    && self
                        .subscribers
                        .get(&stored.entry.metadata.namespace)
                        .map_or(true, |count| *count == 0)
            })
            .map(|stored| stored.entry.key.clone())
            .collect();
        for key in victims {
            self.evict(&key);
            report.removed_entries += 1;
        }

        // 2. Pack every remaining plain value of meaningful size
        let keys: Vec<String> = self
            .store
            .iter()
            .filter(|s| s.packed.is_none())
            .map(|s| s.entry.key.clone())
            .collect();
        for key in keys {
            if self.pack_entry(&key) {
                report.packed_entries += 1;
            }
        }

        // 3. Volatile metrics restart
        self.metrics
            .lock()
            .expect("metrics lock")
            .reset_non_persistent();

        report.bytes_after = self.usage_bytes.load(Ordering::Relaxed);
        self.metrics_sink.record(MetricEvent::new(
            metric_names::MEMORY_PRESSURE,
            self.memory_pressure(),
        ));
        info!(
            removed = report.removed_entries,
            packed = report.packed_entries,
            "emergency cleanup finished"
        );
        report
    }

    fn pack_entry(&self, key: &str) -> bool {
        let Some(mut stored) = self.store.get_mut(key) else {
            return false;
        };
        if stored.packed.is_some() {
            return false;
        }
        let Ok(serialized) = rmp_serde::to_vec(&stored.entry.value) else {
            return false;
        };
        if serialized.len() <= PACK_THRESHOLD {
            return false;
        }
        let Ok(blob) = Compressor::compress_detached(&serialized) else {
            return false;
        };
        let before = stored.footprint();
        stored.entry.value = Value::Null;
        stored.packed = Some(blob);
        let after = stored.footprint();
        drop(stored);
        self.adjust_usage(after as i64 - before as i64);
        true
    }

    // ---------------------------------------------------------------
    // Metrics
    // ---------------------------------------------------------------

    /// Current metrics, with derived gauges recomputed
    pub fn metrics(&self) -> ManagerMetrics {
        let mut metrics = self.metrics.lock().expect("metrics lock").clone();
        metrics.total_memory_usage = self.usage_bytes.load(Ordering::Relaxed);
        metrics.replicated_memory_usage = self
            .store
            .iter()
            .filter(|s| s.entry.metadata.source_agent != self.agent)
            .map(|s| s.footprint())
            .sum();
        metrics.compression_savings = self
            .compressor
            .lock()
            .expect("compressor lock")
            .stats()
            .savings();
        metrics.topology_efficiency = self.topology().efficiency();

        let shard_loads: Vec<u64> = self
            .shards
            .lock()
            .expect("shards lock")
            .snapshot()
            .active()
            .map(|s| s.size_bytes.max(s.key_count))
            .collect();
        metrics.partition_balance = partition_balance(&shard_loads);

        let resolver = self.resolver.lock().expect("resolver lock");
        metrics.conflict_rate = resolver
            .stats()
            .conflict_rate(metrics.syncs, self.config.conflict.ops_per_sync);
        metrics
    }

    pub fn pending_conflicts(&self) -> usize {
        self.resolver.lock().expect("resolver lock").pending().len()
    }

    // ---------------------------------------------------------------
    // Background tasks
    // ---------------------------------------------------------------

    /// Start gossip workers, the event pump, and the maintenance loop
    ///
    /// Call once; the returned handles stop when `shutdown` cancels them.
    pub fn run(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = self.gossip.spawn_workers();

        let mut event_rx = self
            .event_rx
            .lock()
            .expect("event_rx lock")
            .take()
            .expect("run may only be called once");
        let pump = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = pump.cancel.cancelled() => break,
                    event = event_rx.recv() => match event {
                        Some(event) => pump.handle_gossip_event(event).await,
                        None => break,
                    },
                }
            }
        }));

        let maintenance = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(MAINTENANCE_INTERVAL);
            let mut last_prune = Utc::now();
            let mut last_gc = Utc::now();
            loop {
                tokio::select! {
                    _ = maintenance.cancel.cancelled() => break,
                    _ = tick.tick() => {
                        let now = Utc::now();
                        maintenance.sweep_expired(now);

                        let prune_every = chrono::Duration::from_std(
                            maintenance.config.vector_clock.prune_interval,
                        )
                        .unwrap_or_else(|_| chrono::Duration::max_value());
                        if now.signed_duration_since(last_prune) >= prune_every {
                            last_prune = now;
                            maintenance
                                .clock
                                .lock()
                                .expect("clock lock")
                                .prune(&maintenance.config.vector_clock, now);
                        }

                        let gc_every = chrono::Duration::from_std(
                            maintenance.config.compression.gc_interval,
                        )
                        .unwrap_or_else(|_| chrono::Duration::max_value());
                        if now.signed_duration_since(last_gc) >= gc_every {
                            last_gc = now;
                            maintenance
                                .compressor
                                .lock()
                                .expect("compressor lock")
                                .sweep(maintenance.config.compression.cache_max_age, now);
                        }

                        let pressure = maintenance.memory_pressure();
                        maintenance.metrics_sink.record(MetricEvent::new(
                            metric_names::MEMORY_PRESSURE,
                            pressure,
                        ));
                        if pressure > PRESSURE_LIMIT {
                            maintenance.emergency_cleanup("pressure threshold exceeded");
                        }
                    }
                }
            }
        }));

        handles
    }

    async fn handle_gossip_event(&self, event: GossipEvent) {
        match event {
            GossipEvent::OperationsReceived { from, operations } => {
                if let Some(mut profile) = self.profiles.get_mut(&from) {
                    profile.touch();
                }
                for op in &operations {
                    let _ = self.apply_operation(op);
                }
                self.oplog
                    .lock()
                    .expect("oplog lock")
                    .synchronize_with(&operations);
                let mut source_vector = self
                    .sync_vectors
                    .entry(from)
                    .or_insert_with(|| VectorClock::new(self.agent.clone()));
                for op in &operations {
                    source_vector.merge(&op.clock);
                }
            }
            GossipEvent::SyncRequested { from, sync_vector } => {
                let operations = self
                    .oplog
                    .lock()
                    .expect("oplog lock")
                    .operations_since(&sync_vector);
                if let Err(error) = self.gossip.send_sync_response(&from, operations).await {
                    debug!(peer = %from, %error, "sync response failed");
                }
            }
            GossipEvent::NodeInactive { agent } => {
                debug!(peer = %agent, "peer inactive");
            }
            GossipEvent::NodeLeft { agent } => {
                self.shards.lock().expect("shards lock").remove_node(&agent);
                self.profiles.remove(&agent);
                self.refresh_topology();
            }
            GossipEvent::RumorReceived { from, name, .. } => {
                debug!(peer = %from, rumor = %name, "rumor received");
            }
        }
    }

    /// Announce departure, stop the workers, snapshot if possible
    pub async fn shutdown(&self) {
        if let Err(error) = self.save_snapshot().await {
            warn!(%error, "snapshot on shutdown failed");
        }
        self.gossip.shutdown().await;
        self.cancel.cancel();
        info!(agent = %self.agent, "memory manager stopped");
    }

    // ---------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------

    /// Write the snapshot through the persistence hook, if one is wired
    pub async fn save_snapshot(&self) -> AxonResult<()> {
        let Some(sink) = &self.persistence else {
            return Ok(());
        };
        let snapshot = self.encode_snapshot()?;
        sink.snapshot_store(&snapshot).await
    }

    /// Restore store, clock, and sync vectors from the persisted snapshot
    pub async fn restore_snapshot(&self) -> AxonResult<bool> {
        let Some(sink) = &self.persistence else {
            return Ok(false);
        };
        let Some(snapshot) = sink.load_snapshot().await? else {
            return Ok(false);
        };
        self.decode_snapshot(&snapshot)?;
        Ok(true)
    }

    fn encode_snapshot(&self) -> AxonResult<Vec<u8>> {
        let mut out = Vec::new();

        // Header: agent, clock, topology type, shard map version
        let agent = self.agent.as_str().as_bytes();
        out.extend_from_slice(&(agent.len() as u16).to_be_bytes());
        out.extend_from_slice(agent);
        let clock_bin = self.clock.lock().expect("clock lock").to_binary();
        out.extend_from_slice(&(clock_bin.len() as u32).to_be_bytes());
        out.extend_from_slice(&clock_bin);
        out.push(topology_tag(self.topology().topology_type));
        out.extend_from_slice(
            &self
                .shards
                .lock()
                .expect("shards lock")
                .snapshot()
                .version
                .to_be_bytes(),
        );

        // Per-key records
        let entries: Vec<(MemoryEntry, Option<CompressedBlob>)> = self
            .store
            .iter()
            .map(|s| (s.entry.clone(), s.packed.clone()))
            .collect();
        out.extend_from_slice(&(entries.len() as u32).to_be_bytes());
        for (entry, packed) in entries {
            let value = match packed {
                Some(blob) => {
                    let bytes = Compressor::decompress_detached(&blob)?;
                    rmp_serde::from_slice::<Value>(&bytes)
                        .map_err(|e| AxonError::internal(format!("snapshot unpack: {}", e)))?
                }
                None => entry.value.clone(),
            };
            write_record(&mut out, entry.key.as_bytes());
            write_record(&mut out, &entry.clock.to_binary());
            write_record(
                &mut out,
                &rmp_serde::to_vec(&value)
                    .map_err(|e| AxonError::internal(format!("snapshot value: {}", e)))?,
            );
            write_record(
                &mut out,
                &rmp_serde::to_vec(&entry.metadata)
                    .map_err(|e| AxonError::internal(format!("snapshot metadata: {}", e)))?,
            );
        }

        // Per-peer sync vectors
        let vectors: Vec<(AgentId, VectorClock)> = self
            .sync_vectors
            .iter()
            .map(|v| (v.key().clone(), v.value().clone()))
            .collect();
        out.extend_from_slice(&(vectors.len() as u32).to_be_bytes());
        for (agent, vector) in vectors {
            write_record(&mut out, agent.as_str().as_bytes());
            write_record(&mut out, &vector.to_binary());
        }

        zstd::bulk::compress(&out, 3)
            .map_err(|e| AxonError::internal(format!("snapshot compression: {}", e)))
    }

    fn decode_snapshot(&self, compressed: &[u8]) -> AxonResult<()> {
        let bytes = zstd::stream::decode_all(compressed)
            .map_err(|e| AxonError::internal(format!("snapshot decompression: {}", e)))?;
        let mut reader = SnapshotReader::new(&bytes);

        let _agent = reader.read_sized_u16()?;
        let clock_bin = reader.read_sized_u32()?;
        let clock = VectorClock::from_binary(&clock_bin)?;
        let _topology = reader.read_u8()?;
        let _shard_version = reader.read_u64()?;

        let record_count = reader.read_u32()? as usize;
        for _ in 0..record_count {
            let key = String::from_utf8(reader.read_sized_u32()?)
                .map_err(|_| AxonError::internal("snapshot key not UTF-8"))?;
            let entry_clock = VectorClock::from_binary(&reader.read_sized_u32()?)?;
            let value: Value = rmp_serde::from_slice(&reader.read_sized_u32()?)
                .map_err(|e| AxonError::internal(format!("snapshot value decode: {}", e)))?;
            let metadata: EntryMetadata = rmp_serde::from_slice(&reader.read_sized_u32()?)
                .map_err(|e| AxonError::internal(format!("snapshot metadata decode: {}", e)))?;
            self.commit_entry(MemoryEntry::new(key, value, entry_clock, metadata));
        }

        let vector_count = reader.read_u32()? as usize;
        for _ in 0..vector_count {
            let agent = AgentId::new(
                String::from_utf8(reader.read_sized_u32()?)
                    .map_err(|_| AxonError::internal("snapshot agent not UTF-8"))?,
            );
            let vector = VectorClock::from_binary(&reader.read_sized_u32()?)?;
            self.sync_vectors.insert(agent, vector);
        }

        self.clock.lock().expect("clock lock").merge(&clock);
        info!(records = record_count, "snapshot restored");
        Ok(())
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    fn unpack(&self, stored: &StoredEntry) -> AxonResult<Value> {
        match &stored.packed {
            None => Ok(stored.entry.value.clone()),
            Some(blob) => {
                let bytes = Compressor::decompress_detached(blob)?;
                rmp_serde::from_slice(&bytes)
                    .map_err(|e| AxonError::internal(format!("unpack failed: {}", e)))
            }
        }
    }

    fn commit_entry(&self, entry: MemoryEntry) {
        let key = entry.key.clone();
        let position = hash_key(&key);
        let stored = StoredEntry {
            packed: None,
            entry,
        };
        let new_footprint = stored.footprint();

        let old_footprint = self
            .store
            .insert(key, stored)
            .map(|old| old.footprint())
            .unwrap_or_else(|| {
                let _ = self
                    .shards
                    .lock()
                    .expect("shards lock")
                    .record_write(position, new_footprint);
                0
            });
        self.adjust_usage(new_footprint as i64 - old_footprint as i64);
    }

    fn evict(&self, key: &str) {
        if let Some((_, stored)) = self.store.remove(key) {
            self.adjust_usage(-(stored.footprint() as i64));
            let _ = self
                .shards
                .lock()
                .expect("shards lock")
                .record_delete(hash_key(key), stored.footprint());
        }
    }

    fn adjust_usage(&self, delta: i64) {
        if delta >= 0 {
            self.usage_bytes.fetch_add(delta as u64, Ordering::Relaxed);
        } else {
            let magnitude = (-delta) as u64;
            let mut current = self.usage_bytes.load(Ordering::Relaxed);
            loop {
                let next = current.saturating_sub(magnitude);
                match self.usage_bytes.compare_exchange_weak(
                    current,
                    next,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(observed) => current = observed,
                }
            }
        }
    }

    async fn append_to_log(&self, op: Operation) {
        if let Some(sink) = &self.persistence {
            if let Ok(bytes) = rmp_serde::to_vec(&op) {
                if let Err(error) = sink.append_operation(&bytes).await {
                    warn!(%error, "operation persistence failed");
                }
            }
        }
        self.oplog.lock().expect("oplog lock").append(op);
    }

    fn sweep_expired(&self, now: chrono::DateTime<Utc>) {
        let expired: Vec<String> = self
            .store
            .iter()
            .filter(|s| s.entry.is_expired(now))
            .map(|s| s.entry.key.clone())
            .collect();
        for key in expired {
            debug!(%key, "ttl expiry");
            self.evict(&key);
        }
    }

    fn gossip_priority(&self, key: &str, priority: u8) -> Priority {
        let from_metadata = match priority {
            0..=2 => Priority::Low,
            3..=6 => Priority::Medium,
            7..=8 => Priority::High,
            _ => Priority::Critical,
        };
        from_metadata.max(self.classifier.classify(key))
    }
}

fn topology_tag(t: axon_core::TopologyType) -> u8 {
    match t {
        axon_core::TopologyType::Mesh => 0,
        axon_core::TopologyType::Hierarchical => 1,
        axon_core::TopologyType::Ring => 2,
        axon_core::TopologyType::Star => 3,
        axon_core::TopologyType::Hybrid => 4,
    }
}

fn write_record(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

/// Bounds-checked reader for the snapshot layout
struct SnapshotReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> SnapshotReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> AxonResult<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(AxonError::internal("snapshot truncated"));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> AxonResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> AxonResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> AxonResult<u64> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_be_bytes(buf))
    }

    fn read_sized_u16(&mut self) -> AxonResult<Vec<u8>> {
        let b = self.take(2)?;
        let len = u16::from_be_bytes([b[0], b[1]]) as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn read_sized_u32(&mut self) -> AxonResult<Vec<u8>> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}
