use crate::VectorClock;
use axon_core::{AgentId, MetaValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Namespace derived from a key prefix
///
/// `"ns:key"` → `"ns"`; keys without a prefix (or with an empty one) fall
/// into `"default"`.
pub const DEFAULT_NAMESPACE: &str = "default";

pub fn namespace_of(key: &str) -> &str {
    match key.split_once(':') {
        Some((ns, _)) if !ns.is_empty() => ns,
        _ => DEFAULT_NAMESPACE,
    }
}

/// Metadata attached to every memory entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub namespace: String,
    pub source_agent: AgentId,
    /// Importance in 0..=10; drives priority conflict resolution and
    /// emergency cleanup ordering
    pub priority: u8,
    pub ttl: Option<Duration>,
    pub content_type: Option<String>,
    pub checksum: Option<String>,
    /// Application extras, typed so conflict conditions need no reflection
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, MetaValue>,
}

impl EntryMetadata {
    pub fn new(key: &str, source_agent: AgentId) -> Self {
        Self {
            namespace: namespace_of(key).to_string(),
            source_agent,
            priority: 5,
            ttl: None,
            content_type: None,
            checksum: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(10);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// One replicated key/value pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub clock: VectorClock,
    pub metadata: EntryMetadata,
    pub updated_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(
        key: impl Into<String>,
        value: serde_json::Value,
        clock: VectorClock,
        metadata: EntryMetadata,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            clock,
            metadata,
            updated_at: Utc::now(),
        }
    }

    /// TTL expiry relative to the last update
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.metadata.ttl {
            Some(ttl) => {
                let ttl = chrono::Duration::from_std(ttl)
                    .unwrap_or_else(|_| chrono::Duration::max_value());
                now.signed_duration_since(self.updated_at) > ttl
            }
            None => false,
        }
    }

    /// Approximate in-memory footprint, used for pressure accounting
    pub fn size_bytes(&self) -> usize {
        self.key.len()
            + serde_json::to_vec(&self.value).map(|v| v.len()).unwrap_or(0)
            + self.clock.len() * 24
    }
}
