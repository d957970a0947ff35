use crate::{
    ot, ConflictContext, ConflictResolution, ConflictStats, MergeSchema, SemanticMerge,
};
use axon_core::{AgentId, AxonError, AxonResult, ConflictConfig, ConflictStrategyKind, MetaValue};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Pluggable strategy interface for application-defined resolution
///
/// Custom strategies register by name; the resolver dispatches to the first
/// registered strategy whose `can_handle` accepts the context (or to the
/// one a rule names explicitly).
pub trait ConflictStrategy: Send + Sync {
    fn can_handle(&self, ctx: &ConflictContext) -> bool;
    fn resolve(&self, ctx: &ConflictContext) -> AxonResult<ConflictResolution>;
}

/// Comparison operator for rule conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Contains,
}

/// Metadata predicate attached to a resolution rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCondition {
    /// `priority`, `namespace`, `content_type`, `conflict_type`, or an
    /// entry-metadata extra field
    pub field: String,
    pub op: ConditionOp,
    pub value: MetaValue,
}

impl RuleCondition {
    fn field_value(&self, ctx: &ConflictContext) -> Option<MetaValue> {
        match self.field.as_str() {
            "priority" => Some(MetaValue::Int(ctx.priority as i64)),
            "namespace" => Some(MetaValue::Str(ctx.namespace.clone())),
            "content_type" => ctx.content_type.clone().map(MetaValue::Str),
            "conflict_type" => Some(MetaValue::Str(format!("{:?}", ctx.conflict_type))),
            other => ctx
                .local
                .metadata
                .extra
                .get(other)
                .or_else(|| ctx.remote.metadata.extra.get(other))
                .cloned(),
        }
    }

    pub fn matches(&self, ctx: &ConflictContext) -> bool {
        let Some(actual) = self.field_value(ctx) else {
            return false;
        };
        match self.op {
            ConditionOp::Eq => actual == self.value,
            ConditionOp::Ne => actual != self.value,
            ConditionOp::Gt => match (actual.as_float(), self.value.as_float()) {
                (Some(a), Some(b)) => a > b,
                _ => false,
            },
            ConditionOp::Lt => match (actual.as_float(), self.value.as_float()) {
                (Some(a), Some(b)) => a < b,
                _ => false,
            },
            ConditionOp::Contains => match (actual.as_str(), self.value.as_str()) {
                (Some(a), Some(b)) => a.contains(b),
                _ => false,
            },
        }
    }
}

/// One entry in the resolver's rule table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionRule {
    pub name: String,
    /// Key glob; `*` matches any run of characters
    pub key_pattern: String,
    pub conditions: Vec<RuleCondition>,
    pub strategy: ConflictStrategyKind,
    /// Required when `strategy` is `Custom`
    pub custom_name: Option<String>,
    /// Higher wins when several rules match
    pub priority: i32,
}

impl ResolutionRule {
    pub fn matches(&self, ctx: &ConflictContext) -> bool {
        key_matches(&self.key_pattern, &ctx.key)
            && self.conditions.iter().all(|c| c.matches(ctx))
    }
}

/// Glob match with `*` wildcards
fn key_matches(pattern: &str, key: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == key;
    }
    let segments: Vec<&str> = pattern.split('*').collect();
    let mut remainder = key;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        match remainder.find(segment) {
            Some(idx) => {
                // First segment must anchor at the start
                if i == 0 && idx != 0 {
                    return false;
                }
                remainder = &remainder[idx + segment.len()..];
            }
            None => return false,
        }
    }
    // Last segment must anchor at the end
    match segments.last() {
        Some(last) if !last.is_empty() => key.ends_with(last) && remainder.is_empty(),
        _ => true,
    }
}

/// A conflict awaiting manual resolution
#[derive(Debug, Clone)]
pub struct PendingConflict {
    pub resolution_id: Uuid,
    pub context: ConflictContext,
    pub created_at: chrono::DateTime<Utc>,
}

/// Strategy-dispatching conflict resolver
pub struct ConflictResolver {
    agent: AgentId,
    config: ConflictConfig,
    rules: Vec<ResolutionRule>,
    custom: HashMap<String, Arc<dyn ConflictStrategy>>,
    pending: Vec<PendingConflict>,
    stats: ConflictStats,
}

impl ConflictResolver {
    pub fn new(agent: AgentId, config: ConflictConfig) -> Self {
        Self {
            agent,
            config,
            rules: Vec::new(),
            custom: HashMap::new(),
            pending: Vec::new(),
            stats: ConflictStats::default(),
        }
    }

    pub fn stats(&self) -> &ConflictStats {
        &self.stats
    }

    pub fn pending(&self) -> &[PendingConflict] {
        &self.pending
    }

    pub fn add_rule(&mut self, rule: ResolutionRule) {
        self.rules.push(rule);
        // Highest priority first so dispatch can take the first match
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn register_custom(&mut self, name: impl Into<String>, strategy: Arc<dyn ConflictStrategy>) {
        self.custom.insert(name.into(), strategy);
    }

    /// Resolve one conflict deterministically
    ///
    /// Every replica running the same rules over the same pair of entries
    /// produces the same resolution, which is what makes gossip-delivered
    /// concurrent writes converge.
    pub fn resolve(&mut self, ctx: &ConflictContext) -> AxonResult<ConflictResolution> {
        let started = Instant::now();
        let (strategy, custom_name) = self.select_strategy(ctx);

        let resolution = match strategy {
            ConflictStrategyKind::Lww => self.resolve_lww(ctx),
            ConflictStrategyKind::Mvr => self.resolve_mvr(ctx),
            ConflictStrategyKind::Semantic => self.resolve_semantic(ctx),
            ConflictStrategyKind::Priority => self.resolve_priority(ctx),
            ConflictStrategyKind::Operational => self.resolve_operational(ctx),
            ConflictStrategyKind::Union => self.resolve_union(ctx),
            ConflictStrategyKind::Intersection => self.resolve_intersection(ctx),
            ConflictStrategyKind::Custom => self.resolve_custom(ctx, custom_name.as_deref()),
            ConflictStrategyKind::Manual => Ok(self.resolve_manual(ctx)),
        }?;

        let elapsed = started.elapsed().as_micros() as u64;
        self.stats
            .record(resolution.strategy, resolution.requires_manual_review, elapsed);
        if resolution.requires_manual_review {
            self.pending.push(PendingConflict {
                resolution_id: resolution.resolution_id,
                context: ctx.clone(),
                created_at: Utc::now(),
            });
        }
        debug!(
            key = %ctx.key,
            strategy = %resolution.strategy,
            confidence = resolution.confidence,
            "conflict resolved"
        );
        Ok(resolution)
    }

    /// Complete a manual review with the operator's choice
    pub fn complete_manual(
        &mut self,
        resolution_id: Uuid,
        chosen: Value,
    ) -> AxonResult<ConflictResolution> {
        let idx = self
            .pending
            .iter()
            .position(|p| p.resolution_id == resolution_id)
            .ok_or_else(|| AxonError::NotFound {
                key: resolution_id.to_string(),
            })?;
        let pending = self.pending.remove(idx);
        self.stats.pending = self.stats.pending.saturating_sub(1);
        self.stats.resolved += 1;
        Ok(ConflictResolution::new(
            ConflictStrategyKind::Manual,
            self.agent.clone(),
            Some(chosen),
            1.0,
            format!("manual choice for key '{}'", pending.context.key),
        ))
    }

    fn select_strategy(&self, ctx: &ConflictContext) -> (ConflictStrategyKind, Option<String>) {
        for rule in &self.rules {
            if rule.matches(ctx) {
                return (rule.strategy, rule.custom_name.clone());
            }
        }
        (self.config.default_strategy, None)
    }

    fn resolve_lww(&self, ctx: &ConflictContext) -> AxonResult<ConflictResolution> {
        let remote_wins = match ctx.remote.updated_at.cmp(&ctx.local.updated_at) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => {
                ctx.remote.metadata.source_agent < ctx.local.metadata.source_agent
            }
        };
        let (winner, loser) = if remote_wins {
            (&ctx.remote, &ctx.local)
        } else {
            (&ctx.local, &ctx.remote)
        };
        Ok(ConflictResolution::new(
            ConflictStrategyKind::Lww,
            self.agent.clone(),
            Some(winner.value.clone()),
            0.9,
            format!(
                "last writer {} at {} wins",
                winner.metadata.source_agent, winner.updated_at
            ),
        )
        .with_alternatives(vec![loser.value.clone()]))
    }

    fn resolve_mvr(&self, ctx: &ConflictContext) -> AxonResult<ConflictResolution> {
        Ok(ConflictResolution::new(
            ConflictStrategyKind::Mvr,
            self.agent.clone(),
            None,
            0.5,
            "concurrent siblings retained; downstream merge may combine them",
        )
        .with_alternatives(vec![ctx.local.value.clone(), ctx.remote.value.clone()]))
    }

    fn resolve_semantic(&self, ctx: &ConflictContext) -> AxonResult<ConflictResolution> {
        let schema = ctx.schema.clone().unwrap_or_default();
        let SemanticMerge {
            value,
            confidence,
            contested_leaves,
        } = crate::merge_values(
            &ctx.local.value,
            &ctx.remote.value,
            ctx.common_ancestor.as_ref(),
            &schema,
            ctx.local.updated_at,
            ctx.remote.updated_at,
        );
        Ok(ConflictResolution::new(
            ConflictStrategyKind::Semantic,
            self.agent.clone(),
            Some(value),
            confidence,
            format!("recursive field merge, {} contested leaves", contested_leaves),
        ))
    }

    fn resolve_priority(&self, ctx: &ConflictContext) -> AxonResult<ConflictResolution> {
        let local_p = ctx.local.metadata.priority;
        let remote_p = ctx.remote.metadata.priority;
        if local_p == remote_p {
            // Equal priority falls back to last-writer-wins
            let mut resolution = self.resolve_lww(ctx)?;
            resolution.reasoning = format!(
                "equal priority {}; fell back to lww ({})",
                local_p, resolution.reasoning
            );
            return Ok(resolution);
        }
        let (winner, loser) = if remote_p > local_p {
            (&ctx.remote, &ctx.local)
        } else {
            (&ctx.local, &ctx.remote)
        };
        Ok(ConflictResolution::new(
            ConflictStrategyKind::Priority,
            self.agent.clone(),
            Some(winner.value.clone()),
            0.85,
            format!(
                "priority {} beats {}",
                winner.metadata.priority, loser.metadata.priority
            ),
        )
        .with_alternatives(vec![loser.value.clone()]))
    }

    fn resolve_operational(&self, ctx: &ConflictContext) -> AxonResult<ConflictResolution> {
        let local_ops: Option<Vec<ot::EditOp>> =
            serde_json::from_value(ctx.local.value.clone()).ok();
        let remote_ops: Option<Vec<ot::EditOp>> =
            serde_json::from_value(ctx.remote.value.clone()).ok();
        let ancestor = ctx.common_ancestor.as_ref().and_then(|a| a.as_str());

        let (Some(local_ops), Some(remote_ops), Some(base)) = (local_ops, remote_ops, ancestor)
        else {
            warn!(key = %ctx.key, "operational strategy needs edit lists and an ancestor; falling back to lww");
            let mut resolution = self.resolve_lww(ctx)?;
            resolution.reasoning =
                format!("operational fallback: {}", resolution.reasoning);
            return Ok(resolution);
        };

        // Priority derives from agent-id order so both sides agree
        let local_has_priority =
            ctx.local.metadata.source_agent < ctx.remote.metadata.source_agent;
        let remote_transformed =
            ot::transform_sequence(&remote_ops, &local_ops, !local_has_priority);

        let after_local = ot::apply(base, &local_ops)?;
        let converged = ot::apply(&after_local, &remote_transformed)?;

        Ok(ConflictResolution::new(
            ConflictStrategyKind::Operational,
            self.agent.clone(),
            Some(Value::String(converged)),
            0.9,
            format!(
                "transformed {} remote edits against {} local edits",
                remote_ops.len(),
                local_ops.len()
            ),
        )
        .with_transforms(remote_transformed))
    }

    fn resolve_union(&self, ctx: &ConflictContext) -> AxonResult<ConflictResolution> {
        let merged = match (&ctx.local.value, &ctx.remote.value) {
            (Value::Array(l), Value::Array(r)) => {
                let mut union = l.clone();
                for item in r {
                    if !union.contains(item) {
                        union.push(item.clone());
                    }
                }
                Value::Array(union)
            }
            (Value::Object(l), Value::Object(r)) => {
                let mut union = l.clone();
                for (k, v) in r {
                    union.entry(k.clone()).or_insert_with(|| v.clone());
                }
                Value::Object(union)
            }
            _ => {
                let mut resolution = self.resolve_lww(ctx)?;
                resolution.reasoning =
                    format!("union needs sets or maps; fell back to lww ({})", resolution.reasoning);
                return Ok(resolution);
            }
        };
        Ok(ConflictResolution::new(
            ConflictStrategyKind::Union,
            self.agent.clone(),
            Some(merged),
            0.9,
            "element-wise union",
        ))
    }

    fn resolve_intersection(&self, ctx: &ConflictContext) -> AxonResult<ConflictResolution> {
        let merged = match (&ctx.local.value, &ctx.remote.value) {
            (Value::Array(l), Value::Array(r)) => {
                Value::Array(l.iter().filter(|v| r.contains(v)).cloned().collect())
            }
            (Value::Object(l), Value::Object(r)) => {
                let common: serde_json::Map<String, Value> = l
                    .iter()
                    .filter(|(k, _)| r.contains_key(*k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                Value::Object(common)
            }
            _ => {
                let mut resolution = self.resolve_lww(ctx)?;
                resolution.reasoning = format!(
                    "intersection needs sets or maps; fell back to lww ({})",
                    resolution.reasoning
                );
                return Ok(resolution);
            }
        };
        Ok(ConflictResolution::new(
            ConflictStrategyKind::Intersection,
            self.agent.clone(),
            Some(merged),
            0.9,
            "element-wise intersection",
        ))
    }

    fn resolve_custom(
        &self,
        ctx: &ConflictContext,
        name: Option<&str>,
    ) -> AxonResult<ConflictResolution> {
        let strategy = match name {
            Some(name) => self.custom.get(name),
            None => self.custom.values().find(|s| s.can_handle(ctx)),
        };
        match strategy {
            Some(strategy) if strategy.can_handle(ctx) => strategy.resolve(ctx),
            _ => {
                warn!(key = %ctx.key, "no custom strategy accepted the conflict; falling back to lww");
                let mut resolution = self.resolve_lww(ctx)?;
                resolution.reasoning =
                    format!("custom fallback: {}", resolution.reasoning);
                Ok(resolution)
            }
        }
    }

    fn resolve_manual(&self, ctx: &ConflictContext) -> ConflictResolution {
        ConflictResolution::new(
            ConflictStrategyKind::Manual,
            self.agent.clone(),
            None,
            0.0,
            format!("key '{}' queued for manual review; local value retained", ctx.key),
        )
        .with_alternatives(vec![ctx.local.value.clone(), ctx.remote.value.clone()])
        .needs_review()
    }
}
