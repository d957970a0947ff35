use axon_core::AgentId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Position of a key on the 64-bit hash ring
pub fn hash_key(key: &str) -> u64 {
    let digest = blake3::hash(key.as_bytes());
    let bytes = digest.as_bytes();
    u64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

/// Consistent-hash ring with virtual nodes
///
/// Each physical node owns `virtual_nodes` ring positions, which evens out
/// key spread and keeps reassignment on membership change down to O(K/N).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashRing {
    virtual_nodes: usize,
    positions: BTreeMap<u64, AgentId>,
    nodes: BTreeSet<AgentId>,
}

impl HashRing {
    pub fn new(virtual_nodes: usize) -> Self {
        Self {
            virtual_nodes: virtual_nodes.max(1),
            positions: BTreeMap::new(),
            nodes: BTreeSet::new(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &AgentId> {
        self.nodes.iter()
    }

    pub fn contains(&self, node: &AgentId) -> bool {
        self.nodes.contains(node)
    }

    pub fn add_node(&mut self, node: AgentId) {
        if !self.nodes.insert(node.clone()) {
            return;
        }
        for i in 0..self.virtual_nodes {
            let position = hash_key(&format!("{}#vn{}", node, i));
            self.positions.insert(position, node.clone());
        }
    }

    pub fn remove_node(&mut self, node: &AgentId) {
        if !self.nodes.remove(node) {
            return;
        }
        self.positions.retain(|_, owner| owner != node);
    }

    /// Physical node owning the first ring position >= the given hash
    pub fn owner_of(&self, position: u64) -> Option<&AgentId> {
        self.positions
            .range(position..)
            .next()
            .or_else(|| self.positions.iter().next())
            .map(|(_, node)| node)
    }

    /// Primary node for a key
    pub fn primary_for(&self, key: &str) -> Option<&AgentId> {
        self.owner_of(hash_key(key))
    }

    /// Primary plus the next distinct physical nodes walking clockwise
    ///
    /// Returns at most `replication_factor` nodes, fewer when the ring has
    /// fewer live physical nodes.
    pub fn replicas_for(&self, key: &str, replication_factor: usize) -> Vec<AgentId> {
        self.replicas_at(hash_key(key), replication_factor)
    }

    pub fn replicas_at(&self, position: u64, replication_factor: usize) -> Vec<AgentId> {
        let mut result: Vec<AgentId> = Vec::with_capacity(replication_factor);
        if self.positions.is_empty() || replication_factor == 0 {
            return result;
        }
        let walk = self
            .positions
            .range(position..)
            .chain(self.positions.range(..position));
        for (_, node) in walk {
            if !result.contains(node) {
                result.push(node.clone());
                if result.len() == replication_factor.min(self.nodes.len()) {
                    break;
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn agent(s: &str) -> AgentId {
        AgentId::new(s)
    }

    fn ring_with(names: &[&str]) -> HashRing {
        let mut ring = HashRing::new(100);
        for name in names {
            ring.add_node(agent(name));
        }
        ring
    }

    #[test]
    fn test_single_node_owns_everything() {
        let ring = ring_with(&["a1"]);
        for key in ["user:1", "task:9", "zzz"] {
            assert_eq!(ring.primary_for(key), Some(&agent("a1")));
        }
    }

    #[test]
    fn test_replicas_are_distinct_nodes() {
        let ring = ring_with(&["a1", "a2", "a3", "a4"]);
        let replicas = ring.replicas_for("user:1", 3);
        assert_eq!(replicas.len(), 3);
        let unique: std::collections::HashSet<_> = replicas.iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_replicas_capped_by_live_nodes() {
        let ring = ring_with(&["a1", "a2"]);
        let replicas = ring.replicas_for("user:1", 5);
        assert_eq!(replicas.len(), 2);
    }

    #[test]
    fn test_add_node_moves_bounded_fraction() {
        let ring_before = ring_with(&["a1", "a2", "a3"]);
        let mut ring_after = ring_before.clone();
        ring_after.add_node(agent("a4"));

        let keys: Vec<String> = (0..2000).map(|i| format!("key:{}", i)).collect();
        let moved = keys
            .iter()
            .filter(|k| ring_before.primary_for(k) != ring_after.primary_for(k))
            .count();

        // Expect roughly K/N = 1/4 of keys to move; allow generous slack
        let fraction = moved as f64 / keys.len() as f64;
        assert!(fraction > 0.10, "too few keys moved: {}", fraction);
        assert!(fraction < 0.45, "too many keys moved: {}", fraction);
    }

    #[test]
    fn test_remove_node_reassigns_deterministically() {
        let mut ring = ring_with(&["a1", "a2", "a3"]);
        let keys: Vec<String> = (0..500).map(|i| format!("key:{}", i)).collect();

        let before: HashMap<&String, AgentId> = keys
            .iter()
            .map(|k| (k, ring.primary_for(k).unwrap().clone()))
            .collect();

        ring.remove_node(&agent("a2"));
        for key in &keys {
            let owner = ring.primary_for(key).unwrap();
            assert_ne!(owner, &agent("a2"));
            // Keys not owned by the removed node stay put
            if before[key] != agent("a2") {
                assert_eq!(owner, &before[key]);
            }
        }
    }

    #[test]
    fn test_distribution_is_roughly_even() {
        let ring = ring_with(&["a1", "a2", "a3", "a4"]);
        let mut counts: HashMap<AgentId, usize> = HashMap::new();
        for i in 0..4000 {
            let owner = ring.primary_for(&format!("key:{}", i)).unwrap().clone();
            *counts.entry(owner).or_insert(0) += 1;
        }
        for (node, count) in &counts {
            // Perfect split is 1000; virtual nodes keep skew modest
            assert!(
                (500..=1600).contains(count),
                "node {} got {} keys",
                node,
                count
            );
        }
    }
}
