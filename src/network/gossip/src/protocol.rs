use crate::{
    GossipMessage, GossipNode, GossipPayload, MessageId, PendingQueue,
};
use axon_compress::{CompressedBlob, Compressor};
use axon_core::{
    decode_frame, encode_frame, metric_names, AgentId, AxonError, AxonResult, AxonConfig,
    GossipConfig, MetricEvent, MetricsSink, Priority, Transport, FLAG_COMPRESSED,
};
use axon_crdt::{Operation, VectorClock};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// How long message ids stay in the dedup history
const HISTORY_MAX_AGE: Duration = Duration::from_secs(300);
/// Base delay for transport retry backoff
const RETRY_BASE_DELAY: Duration = Duration::from_millis(50);
/// Peers probed per anti-entropy round
const ANTI_ENTROPY_PEERS: usize = 3;
/// Farewell rumors get a short fuse
const FAREWELL_TTL: u32 = 3;

/// Everything the gossip layer tells its owner
///
/// The owner registers the receiving end at construction; gossip holds only
/// the sender and never a reference back.
#[derive(Debug, Clone)]
pub enum GossipEvent {
    /// Replicated operations arrived (update or sync response)
    OperationsReceived {
        from: AgentId,
        operations: Vec<Operation>,
    },
    /// A peer asked for operations it has not observed
    SyncRequested {
        from: AgentId,
        sync_vector: VectorClock,
    },
    /// Failure detector marked a peer inactive
    NodeInactive { agent: AgentId },
    /// A peer announced departure
    NodeLeft { agent: AgentId },
    /// Application-level rumor
    RumorReceived {
        from: AgentId,
        name: String,
        data: serde_json::Value,
    },
}

/// Gossip-layer counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GossipStats {
    pub sent: u64,
    pub received: u64,
    pub duplicates: u64,
    pub failed_sends: u64,
    pub forwarded: u64,
    pub compressed_payloads: u64,
}

/// Epidemic propagation engine
pub struct GossipProtocol {
    agent: AgentId,
    config: GossipConfig,
    compression_enabled: bool,
    send_timeout: Duration,
    clock: Mutex<VectorClock>,
    nodes: DashMap<AgentId, GossipNode>,
    history: DashMap<MessageId, DateTime<Utc>>,
    /// Merged clock of everything observed from each peer; the sync vector
    /// shipped in anti-entropy probes
    peer_vectors: DashMap<AgentId, VectorClock>,
    pending: Mutex<PendingQueue>,
    transport: Arc<dyn Transport>,
    metrics: Arc<dyn MetricsSink>,
    events: mpsc::UnboundedSender<GossipEvent>,
    stats: Mutex<GossipStats>,
    quorum_threshold: Mutex<f64>,
    heartbeat_seq: AtomicU64,
    cancel: CancellationToken,
}

impl GossipProtocol {
    /// Build the protocol and hand back the event stream
    pub fn new(
        config: &AxonConfig,
        transport: Arc<dyn Transport>,
        metrics: Arc<dyn MetricsSink>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<GossipEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let protocol = Arc::new(Self {
            agent: config.agent_id.clone(),
            compression_enabled: config.compression.enabled,
            send_timeout: config.timeouts.send_timeout,
            clock: Mutex::new(VectorClock::new(config.agent_id.clone())),
            nodes: DashMap::new(),
            history: DashMap::new(),
            peer_vectors: DashMap::new(),
            pending: Mutex::new(PendingQueue::new(config.gossip_queue_capacity())),
            transport,
            metrics,
            events,
            stats: Mutex::new(GossipStats::default()),
            quorum_threshold: Mutex::new(config.gossip.min_quorum_threshold),
            heartbeat_seq: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            config: config.gossip.clone(),
        });
        (protocol, event_rx)
    }

    pub fn agent(&self) -> &AgentId {
        &self.agent
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stats(&self) -> GossipStats {
        self.stats.lock().expect("stats lock").clone()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().expect("pending lock").len()
    }

    // ---------------------------------------------------------------
    // Membership
    // ---------------------------------------------------------------

    pub fn add_node(&self, agent: AgentId, address: impl Into<String>) {
        if agent == self.agent {
            return;
        }
        debug!(peer = %agent, "node added to gossip table");
        self.nodes
            .insert(agent.clone(), GossipNode::new(agent, address));
    }

    pub fn remove_node(&self, agent: &AgentId) {
        self.nodes.remove(agent);
        self.peer_vectors.remove(agent);
    }

    pub fn node(&self, agent: &AgentId) -> Option<GossipNode> {
        self.nodes.get(agent).map(|n| n.value().clone())
    }

    pub fn nodes(&self) -> Vec<GossipNode> {
        self.nodes.iter().map(|n| n.value().clone()).collect()
    }

    pub fn active_nodes(&self) -> Vec<GossipNode> {
        self.nodes
            .iter()
            .filter(|n| n.active)
            .map(|n| n.value().clone())
            .collect()
    }

    // ---------------------------------------------------------------
    // Quorum
    // ---------------------------------------------------------------

    /// active >= ceil(total * threshold), counting the local node
    pub fn has_quorum(&self) -> bool {
        let threshold = *self.quorum_threshold.lock().expect("quorum lock");
        let total = self.nodes.len() + 1;
        let active = self.active_nodes().len() + 1;
        let required = (total as f64 * threshold).ceil() as usize;
        active >= required
    }

    pub fn update_quorum_threshold(&self, threshold: f64) -> AxonResult<()> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(AxonError::invalid_config(format!(
                "quorum threshold must be in (0, 1], got {}",
                threshold
            )));
        }
        *self.quorum_threshold.lock().expect("quorum lock") = threshold;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Outbound
    // ---------------------------------------------------------------

    /// Queue operations for epidemic propagation
    ///
    /// Returns as soon as the message is enqueued; gossip workers drain the
    /// queue on their own cadence. A full queue rejects low/medium traffic
    /// with `Backpressure`.
    pub fn propagate_update(
        &self,
        operations: Vec<Operation>,
        priority: Priority,
    ) -> AxonResult<MessageId> {
        let clock = {
            let mut clock = self.clock.lock().expect("clock lock");
            clock.increment();
            clock.clone()
        };
        let message = GossipMessage::new(
            self.agent.clone(),
            clock,
            GossipPayload::Update { operations },
            self.config.max_ttl,
            priority,
        );
        let id = message.id;
        // Our own messages go straight into history so echoes are dropped
        self.history.insert(id, Utc::now());
        self.pending.lock().expect("pending lock").push(message)?;
        trace!(message = %id, "update queued");
        Ok(id)
    }

    /// Fanout targets for one message
    ///
    /// Directed messages go to their target only. Broadcasts exclude every
    /// agent already on the path, scale the fanout by priority when
    /// adaptive gossip is on, and prefer high-scoring peers.
    pub fn select_targets(&self, message: &GossipMessage) -> Vec<AgentId> {
        if let Some(target) = &message.target {
            return vec![target.clone()];
        }
        let mut candidates: Vec<GossipNode> = self
            .nodes
            .iter()
            .filter(|n| n.active && !message.has_visited(&n.agent))
            .map(|n| n.value().clone())
            .collect();
        candidates.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut fanout = self.config.fanout as f64;
        if self.config.adaptive_gossip {
            fanout *= match message.priority {
                Priority::Critical => 2.0,
                Priority::High => 1.5,
                Priority::Medium => 1.0,
                Priority::Low => 0.5,
            };
        }
        let fanout = (fanout.ceil() as usize).max(1);
        candidates
            .into_iter()
            .take(fanout)
            .map(|n| n.agent)
            .collect()
    }

    /// Drain one batch from the pending queue and send each message out
    ///
    /// Send failures never surface to the application: they decay the
    /// peer's reliability and feed the metrics sink.
    pub async fn dispatch_once(&self) {
        let batch = {
            let mut pending = self.pending.lock().expect("pending lock");
            pending.pop_batch(self.config.batch_size)
        };
        for entry in batch {
            let targets = self.select_targets(&entry.message);
            for target in targets {
                if let Err(error) = self.send_to(&target, &entry.message).await {
                    warn!(peer = %target, %error, "gossip send failed");
                }
            }
        }
    }

    async fn send_to(&self, target: &AgentId, message: &GossipMessage) -> AxonResult<()> {
        let frame = self.encode_for_wire(message)?;

        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(RETRY_BASE_DELAY * 2u32.pow(attempt - 1)).await;
            }
            let send = self.transport.send(target, frame.clone());
            match tokio::time::timeout(self.send_timeout, send).await {
                Ok(Ok(())) => {
                    self.stats.lock().expect("stats lock").sent += 1;
                    self.metrics.record(
                        MetricEvent::new(metric_names::GOSSIP_SENT, 1.0)
                            .with_tag("type", message.message_type().to_string()),
                    );
                    return Ok(());
                }
                Ok(Err(error)) => last_error = Some(error),
                Err(_) => {
                    last_error = Some(AxonError::Timeout {
                        timeout_ms: self.send_timeout.as_millis() as u64,
                    })
                }
            }
        }

        // Retries exhausted: the peer pays in reliability
        if let Some(mut node) = self.nodes.get_mut(target) {
            node.decay_reliability();
        }
        self.stats.lock().expect("stats lock").failed_sends += 1;
        self.metrics
            .record(MetricEvent::new(metric_names::GOSSIP_FAILED, 1.0));
        Err(last_error.unwrap_or_else(|| AxonError::TransportError {
            target: target.to_string(),
            reason: "retries exhausted".to_string(),
        }))
    }

    fn encode_for_wire(&self, message: &GossipMessage) -> AxonResult<Vec<u8>> {
        let wire = message.to_wire()?;
        if self.compression_enabled && wire.len() > self.config.compression_threshold {
            let blob = Compressor::compress_detached(&wire)?;
            let envelope = rmp_serde::to_vec(&blob)
                .map_err(|e| AxonError::internal(format!("blob encode failed: {}", e)))?;
            self.stats.lock().expect("stats lock").compressed_payloads += 1;
            Ok(encode_frame(FLAG_COMPRESSED, &envelope))
        } else {
            Ok(encode_frame(0, &wire))
        }
    }

    // ---------------------------------------------------------------
    // Inbound
    // ---------------------------------------------------------------

    /// Process one frame delivered by the host transport
    pub fn handle_frame(&self, from: &AgentId, bytes: &[u8]) -> AxonResult<()> {
        let frame = decode_frame(bytes)?;
        let wire = if frame.is_compressed() {
            let blob: CompressedBlob = rmp_serde::from_slice(&frame.payload)
                .map_err(|e| AxonError::internal(format!("blob decode failed: {}", e)))?;
            Compressor::decompress_detached(&blob)?
        } else {
            frame.payload
        };
        let message = GossipMessage::from_wire(&wire)?;
        self.handle_message(from, message)
    }

    /// Process one decoded message
    pub fn handle_message(&self, from: &AgentId, message: GossipMessage) -> AxonResult<()> {
        self.stats.lock().expect("stats lock").received += 1;
        self.metrics.record(
            MetricEvent::new(metric_names::GOSSIP_RECEIVED, 1.0)
                .with_tag("type", message.message_type().to_string()),
        );

        // Dedup by message id
        if self.history.contains_key(&message.id) {
            self.stats.lock().expect("stats lock").duplicates += 1;
            self.metrics
                .record(MetricEvent::new(metric_names::GOSSIP_DUP, 1.0));
            return Ok(());
        }
        self.history.insert(message.id, Utc::now());

        // Sightings revive both the forwarding hop and the originator
        for sighted in [from, &message.source] {
            if let Some(mut node) = self.nodes.get_mut(sighted) {
                node.mark_seen(None);
            }
        }

        // Track causal knowledge per peer and locally
        self.peer_vectors
            .entry(message.source.clone())
            .or_insert_with(|| VectorClock::new(self.agent.clone()))
            .merge(&message.clock);
        self.clock.lock().expect("clock lock").merge(&message.clock);

        match &message.payload {
            GossipPayload::Update { operations } => {
                let _ = self.events.send(GossipEvent::OperationsReceived {
                    from: message.source.clone(),
                    operations: operations.clone(),
                });
                self.forward(&message);
            }
            GossipPayload::SyncResponse { operations } => {
                let _ = self.events.send(GossipEvent::OperationsReceived {
                    from: message.source.clone(),
                    operations: operations.clone(),
                });
            }
            GossipPayload::SyncRequest { sync_vector } => {
                let _ = self.events.send(GossipEvent::SyncRequested {
                    from: message.source.clone(),
                    sync_vector: sync_vector.clone(),
                });
            }
            GossipPayload::Heartbeat { .. } => {
                // mark_seen above is the whole effect
            }
            GossipPayload::Rumor { name, data } => {
                if name == "node_leaving" {
                    if let Some(mut node) = self.nodes.get_mut(&message.source) {
                        node.active = false;
                    }
                    info!(peer = %message.source, "peer announced departure");
                    let _ = self.events.send(GossipEvent::NodeLeft {
                        agent: message.source.clone(),
                    });
                } else {
                    let _ = self.events.send(GossipEvent::RumorReceived {
                        from: message.source.clone(),
                        name: name.clone(),
                        data: data.clone(),
                    });
                }
                self.forward(&message);
            }
        }
        Ok(())
    }

    /// Re-queue a broadcast for the next hop; forwards are best-effort
    fn forward(&self, message: &GossipMessage) {
        if message.target.is_some() {
            return;
        }
        if let Some(copy) = message.forwarded(&self.agent) {
            let mut pending = self.pending.lock().expect("pending lock");
            if pending.push(copy).is_ok() {
                self.stats.lock().expect("stats lock").forwarded += 1;
            }
        }
    }

    // ---------------------------------------------------------------
    // Periodic duties
    // ---------------------------------------------------------------

    /// Send one heartbeat round to the usual fanout targets
    pub async fn heartbeat_round(&self) {
        let sequence = self.heartbeat_seq.fetch_add(1, Ordering::Relaxed);
        let clock = self.clock.lock().expect("clock lock").clone();
        let message = GossipMessage::new(
            self.agent.clone(),
            clock,
            GossipPayload::Heartbeat { sequence },
            1, // heartbeats do not travel
            Priority::Low,
        );
        for target in self.select_targets(&message) {
            let _ = self.send_to(&target, &message).await;
        }
    }

    /// Ask one peer for everything we have not observed from it
    pub async fn request_sync(&self, target: &AgentId) -> AxonResult<()> {
        let sync_vector = self
            .peer_vectors
            .get(target)
            .map(|v| v.value().clone())
            .unwrap_or_else(|| VectorClock::new(self.agent.clone()));
        let clock = self.clock.lock().expect("clock lock").clone();
        let message = GossipMessage::new(
            self.agent.clone(),
            clock,
            GossipPayload::SyncRequest { sync_vector },
            1,
            Priority::Medium,
        )
        .directed(target.clone());
        self.send_to(target, &message).await
    }

    /// Anti-entropy: probe the stalest live peers with our sync vector
    pub async fn anti_entropy_round(&self) {
        let mut peers = self.active_nodes();
        peers.sort_by_key(|n| n.last_seen);
        for peer in peers.into_iter().take(ANTI_ENTROPY_PEERS) {
            if let Err(error) = self.request_sync(&peer.agent).await {
                debug!(peer = %peer.agent, %error, "anti-entropy probe failed");
            }
        }
    }

    /// Answer a sync request with the operations the peer lacks
    pub async fn send_sync_response(
        &self,
        target: &AgentId,
        operations: Vec<Operation>,
    ) -> AxonResult<()> {
        let clock = self.clock.lock().expect("clock lock").clone();
        let message = GossipMessage::new(
            self.agent.clone(),
            clock,
            GossipPayload::SyncResponse { operations },
            1,
            Priority::Medium,
        )
        .directed(target.clone());
        self.send_to(target, &message).await
    }

    /// One failure-detection pass over the node table
    pub fn failure_detection_tick(&self, now: DateTime<Utc>) {
        let suspicion_after = chrono::Duration::from_std(self.config.gossip_interval * 3)
            .unwrap_or_else(|_| chrono::Duration::max_value());
        for mut node in self.nodes.iter_mut() {
            if !node.active {
                continue;
            }
            if now.signed_duration_since(node.last_seen) > suspicion_after {
                let crossed = node.record_failure(self.config.failure_threshold);
                if crossed {
                    warn!(peer = %node.agent, "peer marked inactive");
                    let _ = self.events.send(GossipEvent::NodeInactive {
                        agent: node.agent.clone(),
                    });
                }
            }
        }
    }

    /// Age out dedup history entries
    pub fn sweep_history(&self, now: DateTime<Utc>) -> usize {
        let max_age = chrono::Duration::from_std(HISTORY_MAX_AGE)
            .unwrap_or_else(|_| chrono::Duration::max_value());
        let before = self.history.len();
        self.history
            .retain(|_, seen| now.signed_duration_since(*seen) <= max_age);
        before - self.history.len()
    }

    /// Spawn the periodic workers; they stop when the token is cancelled
    pub fn spawn_workers(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        // Dispatch + heartbeat + failure detection share the gossip cadence
        let dispatch = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(dispatch.config.gossip_interval);
            loop {
                tokio::select! {
                    _ = dispatch.cancel.cancelled() => break,
                    _ = tick.tick() => {
                        dispatch.dispatch_once().await;
                        dispatch.heartbeat_round().await;
                        dispatch.failure_detection_tick(Utc::now());
                    }
                }
            }
        }));

        let sync = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(sync.config.sync_interval);
            loop {
                tokio::select! {
                    _ = sync.cancel.cancelled() => break,
                    _ = tick.tick() => sync.anti_entropy_round().await,
                }
            }
        }));

        let sweeper = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(HISTORY_MAX_AGE);
            loop {
                tokio::select! {
                    _ = sweeper.cancel.cancelled() => break,
                    _ = tick.tick() => {
                        sweeper.sweep_history(Utc::now());
                    }
                }
            }
        }));

        handles
    }

    /// Announce departure, cancel workers, and clear state
    pub async fn shutdown(&self) {
        let clock = self.clock.lock().expect("clock lock").clone();
        let farewell = GossipMessage::new(
            self.agent.clone(),
            clock,
            GossipPayload::Rumor {
                name: "node_leaving".to_string(),
                data: serde_json::json!({ "agent": self.agent }),
            },
            FAREWELL_TTL,
            Priority::High,
        );
        for target in self.select_targets(&farewell) {
            // Best effort; peers that miss this learn from the detector
            let _ = self.send_to(&target, &farewell).await;
        }
        info!(agent = %self.agent, "gossip shutting down");
        self.cancel.cancel();
        self.pending.lock().expect("pending lock").clear();
        self.nodes.clear();
        self.history.clear();
        self.peer_vectors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_core::{LoopbackHub, NullMetrics, RecordingMetrics};
    use axon_crdt::{EntryMetadata, OperationKind};

    fn agent(s: &str) -> AgentId {
        AgentId::new(s)
    }

    fn test_config(name: &str) -> AxonConfig {
        let mut config = AxonConfig::new(name);
        config.gossip.gossip_interval = Duration::from_millis(50);
        config.gossip.max_retries = 0;
        config.timeouts.send_timeout = Duration::from_millis(200);
        config
    }

    fn sample_op(who: &AgentId) -> Operation {
        let mut clock = VectorClock::new(who.clone());
        clock.increment();
        Operation::new(
            OperationKind::Set,
            "user:1",
            Some(serde_json::json!({"age": 30})),
            clock,
            who.clone(),
            EntryMetadata::new("user:1", who.clone()),
        )
    }

    #[tokio::test]
    async fn test_propagate_reaches_peer() {
        let hub = LoopbackHub::new();
        let (t1, _rx1) = hub.register(agent("a1"));
        let (_t2, mut rx2) = hub.register(agent("a2"));

        let (g1, _events1) =
            GossipProtocol::new(&test_config("a1"), Arc::new(t1), Arc::new(NullMetrics));
        g1.add_node(agent("a2"), "mem://a2");

        g1.propagate_update(vec![sample_op(&agent("a1"))], Priority::Medium)
            .unwrap();
        g1.dispatch_once().await;

        let (from, frame) = rx2.recv().await.unwrap();
        assert_eq!(from, agent("a1"));

        // A receiving protocol surfaces the operations as an event
        let (t2b, _rx2b) = hub.register(agent("a2"));
        let (g2, mut events2) =
            GossipProtocol::new(&test_config("a2"), Arc::new(t2b), Arc::new(NullMetrics));
        g2.handle_frame(&agent("a1"), &frame).unwrap();

        match events2.recv().await.unwrap() {
            GossipEvent::OperationsReceived { from, operations } => {
                assert_eq!(from, agent("a1"));
                assert_eq!(operations.len(), 1);
                assert_eq!(operations[0].key, "user:1");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duplicate_frames_counted_once() {
        let hub = LoopbackHub::new();
        let (t1, _rx1) = hub.register(agent("a1"));
        let metrics = Arc::new(RecordingMetrics::new());
        let (g1, mut events) =
            GossipProtocol::new(&test_config("a1"), Arc::new(t1), metrics.clone());

        let msg = GossipMessage::new(
            agent("a2"),
            VectorClock::new(agent("a2")),
            GossipPayload::Update {
                operations: vec![sample_op(&agent("a2"))],
            },
            4,
            Priority::Medium,
        );
        g1.handle_message(&agent("a2"), msg.clone()).unwrap();
        g1.handle_message(&agent("a2"), msg).unwrap();

        assert_eq!(g1.stats().duplicates, 1);
        assert_eq!(metrics.count(metric_names::GOSSIP_DUP), 1);
        // Only one event despite two deliveries
        assert!(events.try_recv().is_ok());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_echo_to_visited_path() {
        let hub = LoopbackHub::new();
        let (t1, _rx1) = hub.register(agent("a1"));
        let (g1, _events) =
            GossipProtocol::new(&test_config("a1"), Arc::new(t1), Arc::new(NullMetrics));
        g1.add_node(agent("a2"), "mem://a2");
        g1.add_node(agent("a3"), "mem://a3");

        let mut msg = GossipMessage::new(
            agent("a2"),
            VectorClock::new(agent("a2")),
            GossipPayload::Heartbeat { sequence: 0 },
            4,
            Priority::Medium,
        );
        msg.path.push(agent("a3"));

        let targets = g1.select_targets(&msg);
        assert!(!targets.contains(&agent("a2")));
        assert!(!targets.contains(&agent("a3")));
    }

    #[tokio::test]
    async fn test_adaptive_fanout_scaling() {
        let hub = LoopbackHub::new();
        let (t1, _rx1) = hub.register(agent("a1"));
        let mut config = test_config("a1");
        config.gossip.fanout = 2;
        config.gossip.adaptive_gossip = true;
        let (g1, _events) = GossipProtocol::new(&config, Arc::new(t1), Arc::new(NullMetrics));
        for i in 0..10 {
            g1.add_node(agent(&format!("p{}", i)), "mem://p");
        }

        let make = |priority| {
            GossipMessage::new(
                agent("a1"),
                VectorClock::new(agent("a1")),
                GossipPayload::Heartbeat { sequence: 0 },
                4,
                priority,
            )
        };
        assert_eq!(g1.select_targets(&make(Priority::Critical)).len(), 4); // x2
        assert_eq!(g1.select_targets(&make(Priority::High)).len(), 3); // x1.5
        assert_eq!(g1.select_targets(&make(Priority::Medium)).len(), 2);
        assert_eq!(g1.select_targets(&make(Priority::Low)).len(), 1); // x0.5
    }

    #[tokio::test]
    async fn test_failure_detection_marks_inactive() {
        let hub = LoopbackHub::new();
        let (t1, _rx1) = hub.register(agent("a1"));
        let mut config = test_config("a1");
        config.gossip.gossip_interval = Duration::from_millis(50);
        config.gossip.failure_threshold = 3;
        let (g1, mut events) = GossipProtocol::new(&config, Arc::new(t1), Arc::new(NullMetrics));
        g1.add_node(agent("a2"), "mem://a2");

        // Well past 3x the gossip interval with no sightings
        let future = Utc::now() + chrono::Duration::milliseconds(500);
        for _ in 0..3 {
            g1.failure_detection_tick(future);
        }

        let node = g1.node(&agent("a2")).unwrap();
        assert!(!node.active);
        assert!((node.reliability - 0.9).abs() < 1e-9);
        assert!(matches!(
            events.recv().await.unwrap(),
            GossipEvent::NodeInactive { .. }
        ));
    }

    #[tokio::test]
    async fn test_quorum_tracks_failures() {
        let hub = LoopbackHub::new();
        let (t1, _rx1) = hub.register(agent("a1"));
        let (g1, _events) =
            GossipProtocol::new(&test_config("a1"), Arc::new(t1), Arc::new(NullMetrics));
        g1.add_node(agent("a2"), "mem://a2");
        g1.add_node(agent("a3"), "mem://a3");
        g1.add_node(agent("a4"), "mem://a4");
        assert!(g1.has_quorum());

        // Knock out three of four peers: 1 of 4 active misses a 0.5 quorum
        let future = Utc::now() + chrono::Duration::seconds(10);
        for _ in 0..10 {
            g1.failure_detection_tick(future);
        }
        assert!(!g1.has_quorum());

        assert!(g1.update_quorum_threshold(1.5).is_err());
        assert!(g1.update_quorum_threshold(0.0).is_err());
        g1.update_quorum_threshold(0.25).unwrap();
        assert!(g1.has_quorum());
    }

    #[tokio::test]
    async fn test_large_payload_is_compressed_on_wire() {
        let hub = LoopbackHub::new();
        let (t1, _rx1) = hub.register(agent("a1"));
        let (_t2, mut rx2) = hub.register(agent("a2"));
        let mut config = test_config("a1");
        config.gossip.compression_threshold = 256;
        let (g1, _events) = GossipProtocol::new(&config, Arc::new(t1), Arc::new(NullMetrics));
        g1.add_node(agent("a2"), "mem://a2");

        // A fat, repetitive operation comfortably over the threshold
        let who = agent("a1");
        let mut op = sample_op(&who);
        op.value = Some(serde_json::json!("lorem ipsum ".repeat(200)));
        g1.propagate_update(vec![op], Priority::Medium).unwrap();
        g1.dispatch_once().await;

        let (_, frame_bytes) = rx2.recv().await.unwrap();
        let frame = decode_frame(&frame_bytes).unwrap();
        assert!(frame.is_compressed());
        assert_eq!(g1.stats().compressed_payloads, 1);

        // The receiving side decodes transparently
        let (t2b, _rx2b) = hub.register(agent("a2"));
        let (g2, mut events2) =
            GossipProtocol::new(&test_config("a2"), Arc::new(t2b), Arc::new(NullMetrics));
        g2.handle_frame(&agent("a1"), &frame_bytes).unwrap();
        assert!(matches!(
            events2.recv().await.unwrap(),
            GossipEvent::OperationsReceived { .. }
        ));
    }

    #[tokio::test]
    async fn test_backpressure_on_full_queue() {
        let hub = LoopbackHub::new();
        let (t1, _rx1) = hub.register(agent("a1"));
        let mut config = test_config("a1");
        config.gossip.batch_size = 1;
        config.gossip.queue_depth_factor = 2; // capacity 2
        let (g1, _events) = GossipProtocol::new(&config, Arc::new(t1), Arc::new(NullMetrics));

        let who = agent("a1");
        g1.propagate_update(vec![sample_op(&who)], Priority::Low)
            .unwrap();
        g1.propagate_update(vec![sample_op(&who)], Priority::Low)
            .unwrap();
        let err = g1
            .propagate_update(vec![sample_op(&who)], Priority::Medium)
            .unwrap_err();
        assert!(matches!(err, AxonError::Backpressure { .. }));

        // Critical traffic preempts instead of failing
        g1.propagate_update(vec![sample_op(&who)], Priority::Critical)
            .unwrap();
    }

    #[tokio::test]
    async fn test_farewell_on_shutdown() {
        let hub = LoopbackHub::new();
        let (t1, _rx1) = hub.register(agent("a1"));
        let (_t2, mut rx2) = hub.register(agent("a2"));
        let (g1, _events) =
            GossipProtocol::new(&test_config("a1"), Arc::new(t1), Arc::new(NullMetrics));
        g1.add_node(agent("a2"), "mem://a2");

        g1.shutdown().await;

        let (_, frame_bytes) = rx2.recv().await.unwrap();
        let frame = decode_frame(&frame_bytes).unwrap();
        let message = GossipMessage::from_wire(&frame.payload).unwrap();
        match message.payload {
            GossipPayload::Rumor { name, .. } => assert_eq!(name, "node_leaving"),
            other => panic!("unexpected payload: {:?}", other),
        }
        assert_eq!(message.ttl, FAREWELL_TTL);
        assert!(g1.cancellation_token().is_cancelled());
        assert!(g1.nodes().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_decays_reliability() {
        let hub = LoopbackHub::new();
        let (t1, _rx1) = hub.register(agent("a1"));
        let (g1, _events) =
            GossipProtocol::new(&test_config("a1"), Arc::new(t1), Arc::new(NullMetrics));
        // Peer is in the table but was never registered on the hub
        g1.add_node(agent("ghost"), "mem://ghost");

        g1.propagate_update(vec![sample_op(&agent("a1"))], Priority::Medium)
            .unwrap();
        g1.dispatch_once().await;

        let node = g1.node(&agent("ghost")).unwrap();
        assert!((node.reliability - 0.9).abs() < 1e-9);
        assert_eq!(g1.stats().failed_sends, 1);
    }

    #[tokio::test]
    async fn test_history_sweep() {
        let hub = LoopbackHub::new();
        let (t1, _rx1) = hub.register(agent("a1"));
        let (g1, _events) =
            GossipProtocol::new(&test_config("a1"), Arc::new(t1), Arc::new(NullMetrics));

        let msg = GossipMessage::new(
            agent("a2"),
            VectorClock::new(agent("a2")),
            GossipPayload::Heartbeat { sequence: 0 },
            1,
            Priority::Low,
        );
        g1.handle_message(&agent("a2"), msg).unwrap();

        // Entries newer than the window survive, older ones age out
        assert_eq!(g1.sweep_history(Utc::now()), 0);
        let future = Utc::now() + chrono::Duration::seconds(600);
        assert_eq!(g1.sweep_history(future), 1);
    }
}
