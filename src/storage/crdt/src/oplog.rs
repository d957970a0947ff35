use crate::{ClockOrdering, EntryMetadata, VectorClock};
use axon_core::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Kind of a replicated mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Set,
    Delete,
    Merge,
    ConflictResolve,
}

/// Atomic unit of replication
///
/// Everything a remote replica needs to re-apply a mutation: the key, the
/// optional value, the writer's clock at write time, and entry metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: Uuid,
    pub kind: OperationKind,
    pub key: String,
    pub value: Option<serde_json::Value>,
    pub clock: VectorClock,
    pub agent: AgentId,
    pub timestamp: DateTime<Utc>,
    pub metadata: EntryMetadata,
}

impl Operation {
    pub fn new(
        kind: OperationKind,
        key: impl Into<String>,
        value: Option<serde_json::Value>,
        clock: VectorClock,
        agent: AgentId,
        metadata: EntryMetadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            key: key.into(),
            value,
            clock,
            agent,
            timestamp: Utc::now(),
            metadata,
        }
    }

    /// Stable content hash, input to delta Merkle chains
    pub fn content_hash(&self) -> blake3::Hash {
        let serialized = rmp_serde::to_vec(self).unwrap_or_default();
        blake3::hash(&serialized)
    }
}

/// Report from applying a batch of remote operations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Causally newer operations that advanced the log
    pub applied: usize,
    /// Operations concurrent with the local frontier
    pub conflicts: usize,
    /// Operations already covered by the local frontier
    pub unchanged: usize,
}

/// Append-only operation log, single writer per owning agent
///
/// The log tracks two clocks: the `frontier` (merge of every appended
/// operation's clock) and the `convergence` point (the last state every
/// known peer has confirmed), which gates garbage collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationLog {
    agent: AgentId,
    entries: Vec<Operation>,
    frontier: VectorClock,
    convergence: VectorClock,
}

impl OperationLog {
    pub fn new(agent: AgentId) -> Self {
        Self {
            frontier: VectorClock::new(agent.clone()),
            convergence: VectorClock::new(agent.clone()),
            agent,
            entries: Vec::new(),
        }
    }

    pub fn agent(&self) -> &AgentId {
        &self.agent
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.entries.iter()
    }

    pub fn frontier(&self) -> &VectorClock {
        &self.frontier
    }

    pub fn convergence(&self) -> &VectorClock {
        &self.convergence
    }

    /// Append a locally-generated operation
    pub fn append(&mut self, op: Operation) {
        self.frontier.merge(&op.clock);
        self.entries.push(op);
    }

    /// Every operation whose clock is *not* dominated by the given vector
    ///
    /// This is the send set for delta sync: a peer at `state` needs exactly
    /// the operations it has not already observed.
    pub fn operations_since(&self, state: &VectorClock) -> Vec<Operation> {
        self.entries
            .iter()
            .filter(|op| {
                !matches!(
                    op.clock.compare(state),
                    ClockOrdering::Before | ClockOrdering::Equal
                )
            })
            .cloned()
            .collect()
    }

    /// Integrate remote operations in (timestamp, agent) order
    ///
    /// Returns how many advanced the log, how many were concurrent with
    /// the local frontier (downstream conflict resolution decides their
    /// effect), and how many were already covered.
    pub fn synchronize_with(&mut self, remote: &[Operation]) -> SyncReport {
        let mut sorted: Vec<&Operation> = remote.iter().collect();
        sorted.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.agent.cmp(&b.agent))
        });

        let mut report = SyncReport::default();
        for op in sorted {
            if self.entries.iter().any(|existing| existing.id == op.id) {
                report.unchanged += 1;
                continue;
            }
            match op.clock.compare(&self.frontier) {
                ClockOrdering::Before | ClockOrdering::Equal => {
                    report.unchanged += 1;
                }
                ClockOrdering::Concurrent => {
                    report.conflicts += 1;
                    self.append(op.clone());
                }
                ClockOrdering::After => {
                    report.applied += 1;
                    self.append(op.clone());
                }
            }
        }
        debug!(
            applied = report.applied,
            conflicts = report.conflicts,
            unchanged = report.unchanged,
            "operation log synchronized"
        );
        report
    }

    /// Raise the confirmed convergence point
    pub fn mark_converged(&mut self, confirmed: &VectorClock) {
        self.convergence.merge(confirmed);
    }

    /// Drop operations dominated by the convergence point and older than
    /// the threshold; returns the number removed
    pub fn garbage_collect(&mut self, older_than: std::time::Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now
            - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero());
        let before = self.entries.len();
        let convergence = self.convergence.clone();
        self.entries.retain(|op| {
            let dominated = matches!(
                op.clock.compare(&convergence),
                ClockOrdering::Before | ClockOrdering::Equal
            );
            !(dominated && op.timestamp < cutoff)
        });
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "operation log compacted");
        }
        removed
    }

    /// CRDT operations never block on quorum
    ///
    /// Convergence is guaranteed by merge semantics alone, so the log
    /// always reports quorum. Kept as an explicit method because callers
    /// share an interface with quorum-gated coordination paths.
    pub fn has_quorum(&self) -> bool {
        true
    }
}
