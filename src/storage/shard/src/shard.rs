use axon_core::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique shard identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShardId(pub Uuid);

impl ShardId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ShardId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ShardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short prefix is plenty for logs
        write!(f, "shard-{}", &self.0.to_string()[..8])
    }
}

/// Lifecycle state of a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardStatus {
    Active,
    Migrating,
    Splitting,
    Merging,
    Failed,
}

/// A contiguous hash-space interval with a primary and replicas
///
/// The interval is inclusive on both ends: `[start, end]`. Active shard
/// intervals partition the full 64-bit hash space with no overlap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shard {
    pub id: ShardId,
    pub start: u64,
    pub end: u64,
    pub primary: AgentId,
    pub replicas: Vec<AgentId>,
    pub size_bytes: u64,
    pub key_count: u64,
    pub last_updated: DateTime<Utc>,
    pub status: ShardStatus,
    pub version: u64,
}

impl Shard {
    pub fn new(start: u64, end: u64, primary: AgentId, replicas: Vec<AgentId>) -> Self {
        Self {
            id: ShardId::new(),
            start,
            end,
            primary,
            replicas,
            size_bytes: 0,
            key_count: 0,
            last_updated: Utc::now(),
            status: ShardStatus::Active,
            version: 0,
        }
    }

    pub fn contains(&self, position: u64) -> bool {
        self.start <= position && position <= self.end
    }

    /// All nodes holding this shard, primary first
    pub fn owners(&self) -> Vec<AgentId> {
        let mut owners = vec![self.primary.clone()];
        for replica in &self.replicas {
            if !owners.contains(replica) {
                owners.push(replica.clone());
            }
        }
        owners
    }

    pub fn is_active(&self) -> bool {
        self.status == ShardStatus::Active
    }

    /// Adjacent on the ring, left immediately before right
    pub fn is_left_neighbor_of(&self, other: &Shard) -> bool {
        self.end != u64::MAX && self.end + 1 == other.start
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(s: &str) -> AgentId {
        AgentId::new(s)
    }

    #[test]
    fn test_contains_is_inclusive() {
        let shard = Shard::new(0x10, 0x20, agent("a1"), vec![]);
        assert!(shard.contains(0x10));
        assert!(shard.contains(0x20));
        assert!(!shard.contains(0x0F));
        assert!(!shard.contains(0x21));
    }

    #[test]
    fn test_adjacency() {
        let left = Shard::new(0, 0x7F, agent("a1"), vec![]);
        let right = Shard::new(0x80, u64::MAX, agent("a1"), vec![]);
        assert!(left.is_left_neighbor_of(&right));
        assert!(!right.is_left_neighbor_of(&left));
    }

    #[test]
    fn test_owners_dedup() {
        let shard = Shard::new(0, 10, agent("a1"), vec![agent("a2"), agent("a1")]);
        assert_eq!(shard.owners(), vec![agent("a1"), agent("a2")]);
    }

    #[test]
    fn test_touch_bumps_version() {
        let mut shard = Shard::new(0, 10, agent("a1"), vec![]);
        let v = shard.version;
        shard.touch();
        assert_eq!(shard.version, v + 1);
    }
}
