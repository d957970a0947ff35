use axon_core::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Resource capacity advertised by a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCapacity {
    pub bandwidth_mbps: f64,
    pub memory_bytes: u64,
    pub cpu_cores: f64,
}

impl Default for NodeCapacity {
    fn default() -> Self {
        Self {
            bandwidth_mbps: 100.0,
            memory_bytes: 1024 * 1024 * 1024, // 1 GiB
            cpu_cores: 1.0,
        }
    }
}

/// One peer as seen by the local gossip layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GossipNode {
    pub agent: AgentId,
    /// Opaque transport address; only the host's transport interprets it
    pub address: String,
    pub last_seen: DateTime<Utc>,
    pub active: bool,
    pub failure_count: u32,
    pub rtt_ms: f64,
    /// 0..=1, decayed on failures, restored on recovery
    pub reliability: f64,
    pub capacity: NodeCapacity,
}

impl GossipNode {
    pub fn new(agent: AgentId, address: impl Into<String>) -> Self {
        Self {
            agent,
            address: address.into(),
            last_seen: Utc::now(),
            active: true,
            failure_count: 0,
            rtt_ms: 50.0,
            reliability: 1.0,
            capacity: NodeCapacity::default(),
        }
    }

    /// Fanout ranking: reliable and fast peers first
    pub fn score(&self) -> f64 {
        self.reliability - self.rtt_ms / 1000.0
    }

    /// Record a sighting (message or heartbeat), reviving the node
    pub fn mark_seen(&mut self, rtt_ms: Option<f64>) {
        self.last_seen = Utc::now();
        self.failure_count = 0;
        if let Some(rtt) = rtt_ms {
            // EWMA keeps the score stable across jittery samples
            self.rtt_ms = self.rtt_ms * 0.8 + rtt * 0.2;
        }
        if !self.active {
            self.active = true;
        }
    }

    /// Count one suspected failure; deactivates at the threshold
    ///
    /// Returns true when this call crossed the threshold.
    pub fn record_failure(&mut self, threshold: u32) -> bool {
        self.failure_count += 1;
        if self.active && self.failure_count >= threshold {
            self.active = false;
            self.reliability = (self.reliability - 0.1).max(0.0);
            return true;
        }
        false
    }

    /// Reliability penalty for exhausted transport retries
    pub fn decay_reliability(&mut self) {
        self.reliability = (self.reliability - 0.1).max(0.0);
    }
}
