use axon_core::{AgentId, Priority};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Capability and trust profile of a peer agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub agent: AgentId,
    pub capabilities: BTreeSet<String>,
    /// 0..=1 accumulated trust
    pub trust: f64,
    pub last_interaction: DateTime<Utc>,
}

impl AgentProfile {
    pub fn new(agent: AgentId) -> Self {
        Self {
            agent,
            capabilities: BTreeSet::new(),
            trust: 0.5,
            last_interaction: Utc::now(),
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    pub fn with_trust(mut self, trust: f64) -> Self {
        self.trust = trust.clamp(0.0, 1.0);
        self
    }

    pub fn touch(&mut self) {
        self.last_interaction = Utc::now();
    }
}

/// Fidelity of a propagated context payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailLevel {
    Full,
    Summary,
}

/// A context update to fan out to relevant peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextUpdate {
    /// Topic tags matched against peer capabilities
    pub topics: Vec<String>,
    pub payload: Value,
    pub detail: DetailLevel,
}

/// Options steering context propagation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagationOptions {
    pub priority: Priority,
    /// Peers scoring below this are skipped
    pub relevance_threshold: f64,
    pub max_targets: usize,
    pub namespace: Option<String>,
}

impl Default for PropagationOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Medium,
            relevance_threshold: 0.3,
            max_targets: 5,
            namespace: None,
        }
    }
}

/// Relevance: 0.5·capability match + 0.3·trust + 0.2·recency
pub fn relevance_score(profile: &AgentProfile, update: &ContextUpdate, now: DateTime<Utc>) -> f64 {
    let capability_match = if update.topics.is_empty() {
        1.0
    } else {
        let matched = update
            .topics
            .iter()
            .filter(|t| profile.capabilities.contains(*t))
            .count();
        matched as f64 / update.topics.len() as f64
    };

    // Linear decay: fully recent at zero, stale after an hour
    let age_secs = now
        .signed_duration_since(profile.last_interaction)
        .num_seconds()
        .max(0) as f64;
    let recency = (1.0 - age_secs / 3600.0).clamp(0.0, 1.0);

    0.5 * capability_match + 0.3 * profile.trust + 0.2 * recency
}

/// Tailor an update to one recipient
///
/// Fields named after topics the agent lacks are stripped from object
/// payloads, and low-relevance recipients get a summary rendering instead
/// of the full document.
pub fn personalize(
    update: &ContextUpdate,
    profile: &AgentProfile,
    relevance: f64,
) -> ContextUpdate {
    let mut payload = update.payload.clone();

    if let Value::Object(ref mut fields) = payload {
        let lacking: BTreeSet<&String> = update
            .topics
            .iter()
            .filter(|t| !profile.capabilities.contains(*t))
            .collect();
        fields.retain(|key, _| !lacking.contains(key));
    }

    let mut detail = update.detail;
    if relevance < 0.6 && detail == DetailLevel::Full {
        detail = DetailLevel::Summary;
        payload = summarize(&payload);
    }

    ContextUpdate {
        topics: update.topics.clone(),
        payload,
        detail,
    }
}

/// Summary rendering: scalar leaves survive, nested structure collapses
fn summarize(payload: &Value) -> Value {
    match payload {
        Value::Object(fields) => {
            let summary: serde_json::Map<String, Value> = fields
                .iter()
                .filter(|(_, v)| !v.is_object() && !v.is_array())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Value::Object(summary)
        }
        Value::String(s) if s.chars().count() > 280 => {
            Value::String(format!("{}…", s.chars().take(280).collect::<String>()))
        }
        other => other.clone(),
    }
}

/// A chosen recipient with its tailored payload
#[derive(Debug, Clone)]
pub struct PropagationTarget {
    pub agent: AgentId,
    pub relevance: f64,
    pub update: ContextUpdate,
}

/// Rank profiles by relevance and personalize for the survivors
pub fn plan_propagation(
    profiles: &[AgentProfile],
    update: &ContextUpdate,
    options: &PropagationOptions,
    now: DateTime<Utc>,
) -> Vec<PropagationTarget> {
    let mut scored: Vec<(f64, &AgentProfile)> = profiles
        .iter()
        .map(|p| (relevance_score(p, update, now), p))
        .filter(|(r, _)| *r >= options.relevance_threshold)
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    scored
        .into_iter()
        .take(options.max_targets)
        .map(|(relevance, profile)| PropagationTarget {
            agent: profile.agent.clone(),
            relevance,
            update: personalize(update, profile, relevance),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profile(name: &str, caps: &[&str], trust: f64) -> AgentProfile {
        AgentProfile::new(AgentId::new(name))
            .with_capabilities(caps.iter().copied())
            .with_trust(trust)
    }

    fn update(topics: &[&str]) -> ContextUpdate {
        ContextUpdate {
            topics: topics.iter().map(|s| s.to_string()).collect(),
            payload: json!({"planning": {"step": 1}, "status": "active", "metrics": [1, 2]}),
            detail: DetailLevel::Full,
        }
    }

    #[test]
    fn test_relevance_weights() {
        let now = Utc::now();
        let full = profile("a1", &["planning", "status", "metrics"], 1.0);
        let score = relevance_score(&full, &update(&["planning", "status", "metrics"]), now);
        assert!((score - 1.0).abs() < 0.01);

        let none = profile("a2", &[], 0.0);
        let mut stale = none.clone();
        stale.last_interaction = now - chrono::Duration::hours(2);
        let score = relevance_score(&stale, &update(&["planning"]), now);
        assert!(score < 0.01);
    }

    #[test]
    fn test_personalize_strips_unknown_capability_fields() {
        let p = profile("a1", &["status"], 0.9);
        let personalized = personalize(&update(&["planning", "status"]), &p, 0.9);
        // "planning" is a topic the agent lacks: stripped
        assert!(personalized.payload.get("planning").is_none());
        assert!(personalized.payload.get("status").is_some());
        // "metrics" is not a topic, so it survives
        assert!(personalized.payload.get("metrics").is_some());
        assert_eq!(personalized.detail, DetailLevel::Full);
    }

    #[test]
    fn test_low_relevance_downgrades_to_summary() {
        let p = profile("a1", &["planning", "status"], 0.2);
        let personalized = personalize(&update(&["planning", "status"]), &p, 0.5);
        assert_eq!(personalized.detail, DetailLevel::Summary);
        // Nested values collapse in the summary rendering
        assert!(personalized.payload.get("planning").is_none());
        assert!(personalized.payload.get("metrics").is_none());
        assert_eq!(personalized.payload.get("status"), Some(&json!("active")));
    }

    #[test]
    fn test_plan_propagation_filters_and_ranks() {
        let now = Utc::now();
        let profiles = vec![
            profile("expert", &["planning", "status", "metrics"], 0.9),
            profile("helper", &["status"], 0.6),
            profile("stranger", &[], 0.0),
        ];
        let options = PropagationOptions {
            relevance_threshold: 0.3,
            max_targets: 2,
            ..Default::default()
        };

        let targets = plan_propagation(
            &profiles,
            &update(&["planning", "status", "metrics"]),
            &options,
            now,
        );
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].agent, AgentId::new("expert"));
        assert!(targets[0].relevance > targets[1].relevance);
        // The stranger never makes the cut
        assert!(targets.iter().all(|t| t.agent != AgentId::new("stranger")));
    }

    #[test]
    fn test_empty_topics_match_everyone() {
        let p = profile("a1", &[], 0.5);
        let u = ContextUpdate {
            topics: vec![],
            payload: json!("broadcast"),
            detail: DetailLevel::Full,
        };
        let score = relevance_score(&p, &u, Utc::now());
        assert!(score >= 0.5 + 0.15); // full capability weight plus trust share
    }
}
