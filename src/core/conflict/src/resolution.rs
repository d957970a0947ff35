use crate::EditOp;
use axon_core::{AgentId, ConflictStrategyKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Outcome of resolving one conflict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub resolution_id: Uuid,
    pub strategy: ConflictStrategyKind,
    /// The value every replica should converge to; `None` when resolution
    /// is deferred (mvr siblings, manual review)
    pub resolved_value: Option<serde_json::Value>,
    /// 0..=1; how mechanical the decision was
    pub confidence: f64,
    pub reasoning: String,
    pub applied_transforms: Option<Vec<EditOp>>,
    pub alternative_values: Option<Vec<serde_json::Value>>,
    pub requires_manual_review: bool,
    pub timestamp: DateTime<Utc>,
    pub resolver_agent: AgentId,
}

impl ConflictResolution {
    pub fn new(
        strategy: ConflictStrategyKind,
        resolver_agent: AgentId,
        resolved_value: Option<serde_json::Value>,
        confidence: f64,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            resolution_id: Uuid::new_v4(),
            strategy,
            resolved_value,
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: reasoning.into(),
            applied_transforms: None,
            alternative_values: None,
            requires_manual_review: false,
            timestamp: Utc::now(),
            resolver_agent,
        }
    }

    pub fn with_alternatives(mut self, alternatives: Vec<serde_json::Value>) -> Self {
        self.alternative_values = Some(alternatives);
        self
    }

    pub fn with_transforms(mut self, transforms: Vec<EditOp>) -> Self {
        self.applied_transforms = Some(transforms);
        self
    }

    pub fn needs_review(mut self) -> Self {
        self.requires_manual_review = true;
        self
    }
}

/// Running statistics kept by the resolver
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConflictStats {
    pub total: u64,
    pub resolved: u64,
    pub pending: u64,
    pub manual_review: u64,
    pub per_strategy: BTreeMap<String, u64>,
    pub total_resolution_micros: u64,
}

impl ConflictStats {
    pub fn record(&mut self, strategy: ConflictStrategyKind, manual: bool, elapsed_micros: u64) {
        self.total += 1;
        if manual {
            self.manual_review += 1;
            self.pending += 1;
        } else {
            self.resolved += 1;
        }
        *self.per_strategy.entry(strategy.to_string()).or_insert(0) += 1;
        self.total_resolution_micros += elapsed_micros;
    }

    pub fn avg_resolution_micros(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.total_resolution_micros as f64 / self.total as f64
        }
    }

    /// resolved / (total_syncs * ops_per_sync)
    ///
    /// `ops_per_sync` is the configurable stand-in for the upstream magic
    /// constant; see `ConflictConfig`.
    pub fn conflict_rate(&self, total_syncs: u64, ops_per_sync: u32) -> f64 {
        let denominator = total_syncs.saturating_mul(ops_per_sync as u64);
        if denominator == 0 {
            0.0
        } else {
            self.resolved as f64 / denominator as f64
        }
    }
}
