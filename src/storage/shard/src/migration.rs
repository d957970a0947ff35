use crate::ShardId;
use axon_core::{AgentId, AxonError, AxonResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

/// Migration lifecycle
///
/// `Pending → Running → Completed | Failed`, with `Cancelled` reachable
/// from the two live states. A failed or cancelled migration leaves the
/// source shard intact; partial target writes are discarded by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Why this migration exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationReason {
    Split,
    Merge,
    Rebalance,
    NodeRemoval,
    NodeJoin,
}

/// One shard-data transfer between nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationTask {
    pub id: Uuid,
    pub shard_id: ShardId,
    pub source: AgentId,
    pub target: AgentId,
    pub reason: MigrationReason,
    pub status: MigrationStatus,
    pub bytes_transferred: u64,
    pub keys_transferred: u64,
    pub total_bytes: u64,
    pub total_keys: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl MigrationTask {
    pub fn new(
        shard_id: ShardId,
        source: AgentId,
        target: AgentId,
        reason: MigrationReason,
        total_bytes: u64,
        total_keys: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            shard_id,
            source,
            target,
            reason,
            status: MigrationStatus::Pending,
            bytes_transferred: 0,
            keys_transferred: 0,
            total_bytes,
            total_keys,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            MigrationStatus::Completed | MigrationStatus::Failed | MigrationStatus::Cancelled
        )
    }

    /// 0..=1 across bytes and keys
    pub fn progress(&self) -> f64 {
        let byte_part = if self.total_bytes == 0 {
            1.0
        } else {
            self.bytes_transferred as f64 / self.total_bytes as f64
        };
        let key_part = if self.total_keys == 0 {
            1.0
        } else {
            self.keys_transferred as f64 / self.total_keys as f64
        };
        ((byte_part + key_part) / 2.0).min(1.0)
    }

    pub fn start(&mut self) -> AxonResult<()> {
        self.transition(MigrationStatus::Pending, MigrationStatus::Running)?;
        self.started_at = Some(Utc::now());
        debug!(migration = %self.id, shard = %self.shard_id, "migration started");
        Ok(())
    }

    /// Record one transferred chunk
    pub fn tick(&mut self, bytes: u64, keys: u64) -> AxonResult<()> {
        if self.status != MigrationStatus::Running {
            return Err(AxonError::MigrationFailed {
                migration_id: self.id.to_string(),
                reason: format!("tick in state {:?}", self.status),
            });
        }
        self.bytes_transferred += bytes;
        self.keys_transferred += keys;
        Ok(())
    }

    pub fn complete(&mut self) -> AxonResult<()> {
        self.transition(MigrationStatus::Running, MigrationStatus::Completed)?;
        self.finished_at = Some(Utc::now());
        debug!(migration = %self.id, keys = self.keys_transferred, "migration completed");
        Ok(())
    }

    /// Mark failed; the source shard stays authoritative
    pub fn fail(&mut self, reason: impl Into<String>) -> AxonResult<()> {
        if self.is_terminal() {
            return Err(AxonError::MigrationFailed {
                migration_id: self.id.to_string(),
                reason: format!("fail in terminal state {:?}", self.status),
            });
        }
        let reason = reason.into();
        warn!(migration = %self.id, %reason, "migration failed");
        self.status = MigrationStatus::Failed;
        self.error = Some(reason);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Cancel a pending or running migration; partial state reverts
    pub fn cancel(&mut self) -> AxonResult<()> {
        if self.is_terminal() {
            return Err(AxonError::Cancelled);
        }
        self.status = MigrationStatus::Cancelled;
        self.finished_at = Some(Utc::now());
        debug!(migration = %self.id, "migration cancelled");
        Ok(())
    }

    fn transition(&mut self, from: MigrationStatus, to: MigrationStatus) -> AxonResult<()> {
        if self.status != from {
            return Err(AxonError::MigrationFailed {
                migration_id: self.id.to_string(),
                reason: format!("invalid transition {:?} -> {:?}", self.status, to),
            });
        }
        self.status = to;
        Ok(())
    }
}
