use crate::Crdt;
use axon_core::AgentId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Grow-only counter (G-Counter)
///
/// Each agent owns a cell that only increases; the counter value is the sum
/// of all cells. Merge takes the pointwise maximum, so replicas converge
/// regardless of delivery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GCounter {
    cells: BTreeMap<AgentId, u64>,
}

impl GCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `amount` to the agent's cell, returning the cell's new value
    pub fn increment(&mut self, agent: &AgentId, amount: u64) -> u64 {
        let cell = self.cells.entry(agent.clone()).or_insert(0);
        *cell += amount;
        *cell
    }

    /// Sum of all cells
    pub fn value(&self) -> u64 {
        self.cells.values().sum()
    }

    pub fn cell(&self, agent: &AgentId) -> u64 {
        self.cells.get(agent).copied().unwrap_or(0)
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentId> {
        self.cells.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty() || self.value() == 0
    }

    /// True when every cell here is <= the other's cell
    pub fn is_subset_of(&self, other: &GCounter) -> bool {
        self.cells
            .iter()
            .all(|(agent, &count)| count <= other.cell(agent))
    }
}

impl Crdt for GCounter {
    fn merge(&mut self, other: &Self) {
        for (agent, &count) in &other.cells {
            let cell = self.cells.entry(agent.clone()).or_insert(0);
            *cell = (*cell).max(count);
        }
    }
}

impl std::fmt::Display for GCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GCounter({})", self.value())
    }
}
