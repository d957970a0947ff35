use axon_core::{AgentId, ConsistencyLevel, TopologyType};
use serde::{Deserialize, Serialize};

/// Dominant access pattern, an input to topology selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadPattern {
    ReadHeavy,
    WriteHeavy,
    Mixed,
}

/// Inputs to the topology optimizer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyInputs {
    pub agent_count: usize,
    pub average_latency_ms: f64,
    /// 0..=1 fraction of the memory budget in use
    pub memory_pressure: f64,
    pub consistency: ConsistencyLevel,
    pub network_partitions: usize,
    pub workload: WorkloadPattern,
}

/// Pick a topology for the observed conditions
///
/// Small swarms mesh (coordination is cheap), large strongly-consistent
/// swarms go hierarchical, pressured swarms go hybrid, everything else is
/// ring or star by workload with star as the default.
pub fn select_topology(inputs: &TopologyInputs) -> TopologyType {
    if inputs.agent_count <= 6 {
        return TopologyType::Mesh;
    }
    if inputs.agent_count > 12 && inputs.consistency == ConsistencyLevel::Strong {
        return TopologyType::Hierarchical;
    }
    if inputs.memory_pressure > 0.8 {
        return TopologyType::Hybrid;
    }
    match inputs.workload {
        WorkloadPattern::WriteHeavy => TopologyType::Ring,
        _ => TopologyType::Star,
    }
}

/// One published topology generation
///
/// Connection changes are atomic from the application's perspective: the
/// manager drains in-flight sends on the old snapshot before publishing
/// the next one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    pub topology_type: TopologyType,
    pub nodes: Vec<AgentId>,
    pub connections: Vec<(AgentId, AgentId)>,
    pub version: u64,
}

impl TopologySnapshot {
    pub fn empty() -> Self {
        Self {
            topology_type: TopologyType::Star,
            nodes: Vec::new(),
            connections: Vec::new(),
            version: 0,
        }
    }

    pub fn build(topology_type: TopologyType, mut nodes: Vec<AgentId>, version: u64) -> Self {
        nodes.sort();
        nodes.dedup();
        let connections = build_connections(topology_type, &nodes);
        Self {
            topology_type,
            nodes,
            connections,
            version,
        }
    }

    /// Peers directly connected to `agent`
    pub fn neighbors(&self, agent: &AgentId) -> Vec<AgentId> {
        let mut result = Vec::new();
        for (a, b) in &self.connections {
            if a == agent && !result.contains(b) {
                result.push(b.clone());
            } else if b == agent && !result.contains(a) {
                result.push(a.clone());
            }
        }
        result
    }

    /// existing connections / possible connections
    pub fn efficiency(&self) -> f64 {
        let n = self.nodes.len();
        if n < 2 {
            return 1.0;
        }
        let possible = n * (n - 1) / 2;
        self.connections.len() as f64 / possible as f64
    }
}

/// Build the connection set for a topology over sorted nodes
pub fn build_connections(
    topology_type: TopologyType,
    nodes: &[AgentId],
) -> Vec<(AgentId, AgentId)> {
    let n = nodes.len();
    if n < 2 {
        return Vec::new();
    }
    match topology_type {
        TopologyType::Mesh => {
            let mut connections = Vec::with_capacity(n * (n - 1) / 2);
            for i in 0..n {
                for j in i + 1..n {
                    connections.push((nodes[i].clone(), nodes[j].clone()));
                }
            }
            connections
        }
        TopologyType::Ring => {
            let mut connections = Vec::with_capacity(n);
            for i in 0..n {
                connections.push((nodes[i].clone(), nodes[(i + 1) % n].clone()));
            }
            if n == 2 {
                connections.truncate(1);
            }
            connections
        }
        TopologyType::Star => {
            // Deterministic hub: the lexicographically smallest id
            let hub = &nodes[0];
            nodes[1..]
                .iter()
                .map(|node| (hub.clone(), node.clone()))
                .collect()
        }
        TopologyType::Hierarchical => {
            let group_size = (n as f64).sqrt().ceil() as usize;
            let mut connections = Vec::new();
            let leaders: Vec<&AgentId> = nodes.chunks(group_size).map(|g| &g[0]).collect();
            // Leaders form a mesh
            for i in 0..leaders.len() {
                for j in i + 1..leaders.len() {
                    connections.push((leaders[i].clone(), leaders[j].clone()));
                }
            }
            // Members hang off their group leader
            for group in nodes.chunks(group_size) {
                for member in &group[1..] {
                    connections.push((group[0].clone(), member.clone()));
                }
            }
            connections
        }
        TopologyType::Hybrid => {
            // Ring across group leaders, star within each group
            let group_size = (n as f64).sqrt().ceil() as usize;
            let mut connections = Vec::new();
            let leaders: Vec<&AgentId> = nodes.chunks(group_size).map(|g| &g[0]).collect();
            for i in 0..leaders.len() {
                if leaders.len() > 1 {
                    connections.push((
                        leaders[i].clone(),
                        leaders[(i + 1) % leaders.len()].clone(),
                    ));
                }
            }
            if leaders.len() == 2 {
                connections.truncate(1);
            }
            for group in nodes.chunks(group_size) {
                for member in &group[1..] {
                    connections.push((group[0].clone(), member.clone()));
                }
            }
            connections
        }
    }
}
