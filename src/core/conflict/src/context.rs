use crate::MergeSchema;
use axon_core::AgentId;
use axon_crdt::{namespace_of, ClockOrdering, MemoryEntry};
use serde::{Deserialize, Serialize};

/// How two writes came into conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Concurrent writes to the same key, same value shape
    ConcurrentWrite,
    /// A write raced a dependent read; flagged by the caller, never inferred
    ReadWrite,
    /// Concurrent writes with differing value shapes (object vs array, ...)
    Structural,
    /// Concurrent edits to text content
    Semantic,
}

impl ConflictType {
    /// Classify a concurrent pair by value shape
    pub fn classify(local: &serde_json::Value, remote: &serde_json::Value) -> Self {
        use serde_json::Value;
        match (local, remote) {
            (Value::String(_), Value::String(_)) => ConflictType::Semantic,
            (Value::Object(_), Value::Object(_))
            | (Value::Array(_), Value::Array(_))
            | (Value::Number(_), Value::Number(_))
            | (Value::Bool(_), Value::Bool(_))
            | (Value::Null, Value::Null) => ConflictType::ConcurrentWrite,
            _ => ConflictType::Structural,
        }
    }
}

/// Everything a strategy needs to resolve one conflict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictContext {
    pub key: String,
    pub namespace: String,
    pub conflict_type: ConflictType,
    pub local: MemoryEntry,
    pub remote: MemoryEntry,
    /// Last value both sides agree on, when known; enables three-way merges
    pub common_ancestor: Option<serde_json::Value>,
    pub agents: Vec<AgentId>,
    /// Max of the two entries' priorities; rules can condition on it
    pub priority: u8,
    pub content_type: Option<String>,
    pub schema: Option<MergeSchema>,
}

impl ConflictContext {
    /// Build a context for two concurrent entries on the same key
    ///
    /// Returns `None` when the clocks are not actually concurrent; callers
    /// should apply the dominant side directly instead of resolving.
    pub fn for_concurrent(local: MemoryEntry, remote: MemoryEntry) -> Option<Self> {
        if local.clock.compare(&remote.clock) != ClockOrdering::Concurrent {
            return None;
        }
        Some(Self::new(local, remote))
    }

    /// Build a context without checking clock concurrency
    pub fn new(local: MemoryEntry, remote: MemoryEntry) -> Self {
        let conflict_type = ConflictType::classify(&local.value, &remote.value);
        let key = local.key.clone();
        let namespace = namespace_of(&key).to_string();
        let priority = local.metadata.priority.max(remote.metadata.priority);
        let content_type = local
            .metadata
            .content_type
            .clone()
            .or_else(|| remote.metadata.content_type.clone());
        let agents = vec![
            local.metadata.source_agent.clone(),
            remote.metadata.source_agent.clone(),
        ];
        Self {
            key,
            namespace,
            conflict_type,
            local,
            remote,
            common_ancestor: None,
            agents,
            priority,
            content_type,
            schema: None,
        }
    }

    pub fn with_ancestor(mut self, ancestor: serde_json::Value) -> Self {
        self.common_ancestor = Some(ancestor);
        self
    }

    pub fn with_schema(mut self, schema: MergeSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn mark_read_write(mut self) -> Self {
        self.conflict_type = ConflictType::ReadWrite;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_crdt::{EntryMetadata, VectorClock};
    use serde_json::json;

    fn agent(s: &str) -> AgentId {
        AgentId::new(s)
    }

    fn entry(key: &str, value: serde_json::Value, agent_id: &AgentId) -> MemoryEntry {
        let mut clock = VectorClock::new(agent_id.clone());
        clock.increment();
        MemoryEntry::new(key, value, clock, EntryMetadata::new(key, agent_id.clone()))
    }

    #[test]
    fn test_classification_by_shape() {
        assert_eq!(
            ConflictType::classify(&json!("a"), &json!("b")),
            ConflictType::Semantic
        );
        assert_eq!(
            ConflictType::classify(&json!({"a": 1}), &json!({"b": 2})),
            ConflictType::ConcurrentWrite
        );
        assert_eq!(
            ConflictType::classify(&json!({"a": 1}), &json!([1, 2])),
            ConflictType::Structural
        );
    }

    #[test]
    fn test_for_concurrent_requires_concurrency() {
        let a1 = agent("a1");
        let local = entry("user:1", json!({"age": 30}), &a1);

        // remote strictly dominates local: not a conflict
        let mut dominating = local.clone();
        dominating.clock.increment();
        assert!(ConflictContext::for_concurrent(local.clone(), dominating).is_none());

        let remote = entry("user:1", json!({"age": 31}), &agent("a2"));
        let ctx = ConflictContext::for_concurrent(local, remote).unwrap();
        assert_eq!(ctx.namespace, "user");
        assert_eq!(ctx.agents.len(), 2);
    }
}
