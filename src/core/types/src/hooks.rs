use crate::error::{AxonError, AxonResult};
use crate::AgentId;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Host-provided hooks
///
/// The core embeds no wire transport, no stable storage, and no metrics
/// backend. The host supplies each concern through one of the traits below;
/// in-process defaults are provided for tests and single-process swarms.

/// Transport hook: deliver an encoded frame to a peer agent
///
/// The transport is the sole source of network latency; the core never
/// simulates delay.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, target: &AgentId, frame: Vec<u8>) -> AxonResult<()>;
}

/// Optional persistence hook with sequential-append semantics
///
/// Operations and snapshots are handed over pre-serialized; the sink only
/// needs append and atomic-rename behavior from its backing path.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn append_operation(&self, op_bytes: &[u8]) -> AxonResult<()>;
    async fn snapshot_store(&self, snapshot: &[u8]) -> AxonResult<()>;
    async fn load_snapshot(&self) -> AxonResult<Option<Vec<u8>>>;
}

/// A single metric observation
#[derive(Debug, Clone)]
pub struct MetricEvent {
    pub name: &'static str,
    pub value: f64,
    pub tags: BTreeMap<String, String>,
}

impl MetricEvent {
    pub fn new(name: &'static str, value: f64) -> Self {
        Self {
            name,
            value,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Metric names emitted by the core
pub mod metric_names {
    pub const GOSSIP_SENT: &str = "a2a.gossip.sent";
    pub const GOSSIP_RECEIVED: &str = "a2a.gossip.received";
    pub const GOSSIP_DUP: &str = "a2a.gossip.dup";
    pub const GOSSIP_FAILED: &str = "a2a.gossip.failed";
    pub const SYNC_LATENCY: &str = "a2a.sync.latency";
    pub const CONFLICT_RESOLVED: &str = "a2a.conflict.resolved";
    pub const CONFLICT_MANUAL: &str = "a2a.conflict.manual";
    pub const SHARD_MIGRATED_BYTES: &str = "a2a.shard.migrated_bytes";
    pub const MEMORY_PRESSURE: &str = "a2a.memory.pressure";
}

/// Metrics hook: callback receiving metric events
pub trait MetricsSink: Send + Sync {
    fn record(&self, event: MetricEvent);
}

/// No-op metrics sink
#[derive(Debug, Default, Clone)]
pub struct NullMetrics;

impl MetricsSink for NullMetrics {
    fn record(&self, _event: MetricEvent) {}
}

/// In-memory metrics sink that keeps every event, for assertions in tests
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    events: std::sync::Mutex<Vec<MetricEvent>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().expect("metrics lock poisoned").clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .expect("metrics lock poisoned")
            .iter()
            .filter(|e| e.name == name)
            .count()
    }
}

impl MetricsSink for RecordingMetrics {
    fn record(&self, event: MetricEvent) {
        self.events.lock().expect("metrics lock poisoned").push(event);
    }
}

/// In-process loopback mesh connecting agents through channels
///
/// Stands in for the host transport when every node lives in one process
/// (tests, benches, embedded swarms). Frames are delivered unmodified and
/// in send order per sender/receiver pair.
#[derive(Debug, Default)]
pub struct LoopbackHub {
    inboxes: DashMap<AgentId, mpsc::UnboundedSender<(AgentId, Vec<u8>)>>,
}

impl LoopbackHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an agent, returning its transport handle and inbound frames
    pub fn register(
        self: &Arc<Self>,
        agent: AgentId,
    ) -> (ChannelTransport, mpsc::UnboundedReceiver<(AgentId, Vec<u8>)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes.insert(agent.clone(), tx);
        (
            ChannelTransport {
                local: agent,
                hub: Arc::clone(self),
            },
            rx,
        )
    }

    /// Drop an agent's inbox; subsequent sends to it fail
    pub fn disconnect(&self, agent: &AgentId) {
        self.inboxes.remove(agent);
    }

    pub fn is_connected(&self, agent: &AgentId) -> bool {
        self.inboxes.contains_key(agent)
    }
}

/// Transport handle bound to one agent on a `LoopbackHub`
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    local: AgentId,
    hub: Arc<LoopbackHub>,
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, target: &AgentId, frame: Vec<u8>) -> AxonResult<()> {
        let sender = self
            .hub
            .inboxes
            .get(target)
            .ok_or_else(|| AxonError::TransportError {
                target: target.to_string(),
                reason: "peer not registered".to_string(),
            })?;
        sender
            .send((self.local.clone(), frame))
            .map_err(|_| AxonError::TransportError {
                target: target.to_string(),
                reason: "peer inbox closed".to_string(),
            })
    }
}
