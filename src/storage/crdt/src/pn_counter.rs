use crate::{Crdt, GCounter};
use axon_core::AgentId;
use serde::{Deserialize, Serialize};

/// Increment/decrement counter (PN-Counter)
///
/// Two grow-only counters: one for increments, one for decrements. The
/// value is their difference. Cells never go negative, so merge stays a
/// componentwise G-Counter merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PnCounter {
    increments: GCounter,
    decrements: GCounter,
}

impl PnCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add to the agent's increment cell, returning the counter value
    pub fn increment(&mut self, agent: &AgentId, amount: u64) -> i64 {
        self.increments.increment(agent, amount);
        self.value()
    }

    /// Add to the agent's decrement cell, returning the counter value
    pub fn decrement(&mut self, agent: &AgentId, amount: u64) -> i64 {
        self.decrements.increment(agent, amount);
        self.value()
    }

    /// Σ increments − Σ decrements
    pub fn value(&self) -> i64 {
        self.increments.value() as i64 - self.decrements.value() as i64
    }

    /// Net contribution of one agent
    pub fn agent_value(&self, agent: &AgentId) -> i64 {
        self.increments.cell(agent) as i64 - self.decrements.cell(agent) as i64
    }

    pub fn is_empty(&self) -> bool {
        self.increments.is_empty() && self.decrements.is_empty()
    }

    pub fn increments(&self) -> &GCounter {
        &self.increments
    }

    pub fn decrements(&self) -> &GCounter {
        &self.decrements
    }
}

impl Crdt for PnCounter {
    fn merge(&mut self, other: &Self) {
        self.increments.merge(&other.increments);
        self.decrements.merge(&other.decrements);
    }
}

impl std::fmt::Display for PnCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PnCounter({})", self.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::laws;

    fn agent(s: &str) -> AgentId {
        AgentId::new(s)
    }

    #[test]
    fn test_increment_decrement() {
        let mut counter = PnCounter::new();
        assert_eq!(counter.increment(&agent("a1"), 5), 5);
        assert_eq!(counter.increment(&agent("a2"), 3), 8);
        assert_eq!(counter.decrement(&agent("a1"), 2), 6);
        assert_eq!(counter.decrement(&agent("a2"), 4), 2);

        assert_eq!(counter.agent_value(&agent("a1")), 3); // 5 - 2
        assert_eq!(counter.agent_value(&agent("a2")), -1); // 3 - 4
    }

    #[test]
    fn test_negative_total() {
        let mut counter = PnCounter::new();
        counter.decrement(&agent("a1"), 10);
        assert_eq!(counter.value(), -10);
        counter.increment(&agent("a1"), 3);
        assert_eq!(counter.value(), -7);
    }

    #[test]
    fn test_merge_componentwise() {
        let mut c1 = PnCounter::new();
        c1.increment(&agent("a1"), 5);
        c1.decrement(&agent("a2"), 2);

        let mut c2 = PnCounter::new();
        c2.increment(&agent("a1"), 3);
        c2.decrement(&agent("a2"), 4);

        c1.merge(&c2);
        assert_eq!(c1.increments().cell(&agent("a1")), 5); // max(5, 3)
        assert_eq!(c1.decrements().cell(&agent("a2")), 4); // max(2, 4)
        assert_eq!(c1.value(), 1);
    }

    #[test]
    fn test_crdt_laws() {
        let mut c1 = PnCounter::new();
        c1.increment(&agent("a1"), 5);
        c1.decrement(&agent("a1"), 2);
        let mut c2 = PnCounter::new();
        c2.increment(&agent("a2"), 3);
        let mut c3 = PnCounter::new();
        c3.decrement(&agent("a3"), 1);

        assert!(laws::converge(&[c1, c2, c3]));
    }
}
