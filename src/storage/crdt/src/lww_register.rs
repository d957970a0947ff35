use crate::Crdt;
use axon_core::AgentId;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt::Debug;

/// Last-writer-wins register
///
/// Holds `(value, wall timestamp, writer)`. Merge keeps the entry with the
/// higher timestamp; exact ties break toward the lexicographically smaller
/// agent id so every replica picks the same winner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LwwRegister<T> {
    value: Option<T>,
    timestamp: DateTime<Utc>,
    writer: Option<AgentId>,
}

impl<T> Default for LwwRegister<T> {
    fn default() -> Self {
        Self {
            value: None,
            timestamp: DateTime::<Utc>::MIN_UTC,
            writer: None,
        }
    }
}

impl<T> LwwRegister<T>
where
    T: Clone + Debug + PartialEq + Serialize + DeserializeOwned,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write stamped with the current wall clock
    pub fn set(&mut self, value: T, agent: &AgentId) {
        self.set_with_timestamp(value, agent, Utc::now());
    }

    /// Record a write with an explicit timestamp
    ///
    /// Applied only if it would win the merge against the current entry,
    /// keeping local applies consistent with remote merges.
    pub fn set_with_timestamp(&mut self, value: T, agent: &AgentId, timestamp: DateTime<Utc>) {
        if Self::wins(timestamp, Some(agent), self.timestamp, self.writer.as_ref()) {
            self.value = Some(value);
            self.timestamp = timestamp;
            self.writer = Some(agent.clone());
        }
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn writer(&self) -> Option<&AgentId> {
        self.writer.as_ref()
    }

    /// Timestamp desc, then agent id asc
    fn wins(
        ts_a: DateTime<Utc>,
        agent_a: Option<&AgentId>,
        ts_b: DateTime<Utc>,
        agent_b: Option<&AgentId>,
    ) -> bool {
        match ts_a.cmp(&ts_b) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => match (agent_a, agent_b) {
                (Some(a), Some(b)) => a < b,
                (Some(_), None) => true,
                _ => false,
            },
        }
    }
}

impl<T> Crdt for LwwRegister<T>
where
    T: Clone + Debug + PartialEq + Serialize + DeserializeOwned,
{
    fn merge(&mut self, other: &Self) {
        if Self::wins(
            other.timestamp,
            other.writer.as_ref(),
            self.timestamp,
            self.writer.as_ref(),
        ) {
            self.value = other.value.clone();
            self.timestamp = other.timestamp;
            self.writer = other.writer.clone();
        }
    }
}
