use axon_core::{AgentId, AxonError, AxonResult, Priority};
use axon_crdt::{Operation, VectorClock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique gossip message identifier, the dedup key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Message body variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GossipPayload {
    /// Replicated operations spreading epidemically
    Update { operations: Vec<Operation> },
    /// Anti-entropy probe carrying what the sender has seen of the target
    SyncRequest { sync_vector: VectorClock },
    /// Operations the requester was missing
    SyncResponse { operations: Vec<Operation> },
    /// Liveness beacon
    Heartbeat { sequence: u64 },
    /// Out-of-band swarm news (membership, departures)
    Rumor {
        name: String,
        data: serde_json::Value,
    },
}

/// Discriminant of a payload, for logging and metrics tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Update,
    SyncRequest,
    SyncResponse,
    Heartbeat,
    Rumor,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageType::Update => "update",
            MessageType::SyncRequest => "sync_request",
            MessageType::SyncResponse => "sync_response",
            MessageType::Heartbeat => "heartbeat",
            MessageType::Rumor => "rumor",
        };
        write!(f, "{}", name)
    }
}

/// One gossip-protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GossipMessage {
    pub id: MessageId,
    pub source: AgentId,
    /// Directed messages (sync request/response) name their recipient
    pub target: Option<AgentId>,
    pub clock: VectorClock,
    pub payload: GossipPayload,
    pub ttl: u32,
    pub timestamp: DateTime<Utc>,
    /// Agents this message has passed through; nothing propagates back
    pub path: Vec<AgentId>,
    pub priority: Priority,
}

impl GossipMessage {
    pub fn new(
        source: AgentId,
        clock: VectorClock,
        payload: GossipPayload,
        ttl: u32,
        priority: Priority,
    ) -> Self {
        Self {
            id: MessageId::new(),
            path: vec![source.clone()],
            source,
            target: None,
            clock,
            payload,
            ttl,
            timestamp: Utc::now(),
            priority,
        }
    }

    pub fn directed(mut self, target: AgentId) -> Self {
        self.target = Some(target);
        self
    }

    pub fn message_type(&self) -> MessageType {
        match self.payload {
            GossipPayload::Update { .. } => MessageType::Update,
            GossipPayload::SyncRequest { .. } => MessageType::SyncRequest,
            GossipPayload::SyncResponse { .. } => MessageType::SyncResponse,
            GossipPayload::Heartbeat { .. } => MessageType::Heartbeat,
            GossipPayload::Rumor { .. } => MessageType::Rumor,
        }
    }

    pub fn has_visited(&self, agent: &AgentId) -> bool {
        self.path.contains(agent)
    }

    /// Copy for forwarding through `via`: TTL decremented, path extended
    ///
    /// Returns `None` when the TTL is exhausted or the hop already appears
    /// in the path.
    pub fn forwarded(&self, via: &AgentId) -> Option<GossipMessage> {
        if self.ttl == 0 || self.has_visited(via) {
            return None;
        }
        let mut copy = self.clone();
        copy.ttl -= 1;
        copy.path.push(via.clone());
        Some(copy)
    }

    /// Canonical wire form (MessagePack)
    pub fn to_wire(&self) -> AxonResult<Vec<u8>> {
        rmp_serde::to_vec(self)
            .map_err(|e| AxonError::internal(format!("message encode failed: {}", e)))
    }

    pub fn from_wire(bytes: &[u8]) -> AxonResult<GossipMessage> {
        rmp_serde::from_slice(bytes)
            .map_err(|e| AxonError::internal(format!("message decode failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(s: &str) -> AgentId {
        AgentId::new(s)
    }

    fn message(ttl: u32) -> GossipMessage {
        GossipMessage::new(
            agent("a1"),
            VectorClock::new(agent("a1")),
            GossipPayload::Heartbeat { sequence: 1 },
            ttl,
            Priority::Medium,
        )
    }

    #[test]
    fn test_source_is_on_path() {
        let msg = message(4);
        assert!(msg.has_visited(&agent("a1")));
        assert!(!msg.has_visited(&agent("a2")));
    }

    #[test]
    fn test_forwarding_decrements_ttl_and_extends_path() {
        let msg = message(2);
        let hop1 = msg.forwarded(&agent("a2")).unwrap();
        assert_eq!(hop1.ttl, 1);
        assert!(hop1.has_visited(&agent("a2")));

        let hop2 = hop1.forwarded(&agent("a3")).unwrap();
        assert_eq!(hop2.ttl, 0);
        // TTL exhausted: no further hops
        assert!(hop2.forwarded(&agent("a4")).is_none());
    }

    #[test]
    fn test_no_forward_through_visited_agent() {
        let msg = message(5);
        let hop = msg.forwarded(&agent("a2")).unwrap();
        assert!(hop.forwarded(&agent("a1")).is_none());
        assert!(hop.forwarded(&agent("a2")).is_none());
    }

    #[test]
    fn test_wire_roundtrip() {
        let msg = message(3).directed(agent("a2"));
        let bytes = msg.to_wire().unwrap();
        let decoded = GossipMessage::from_wire(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_wire_rejects_garbage() {
        assert!(GossipMessage::from_wire(&[0xFF, 0x00, 0x13]).is_err());
    }
}
