use serde::{Deserialize, Serialize};

/// Message priority levels
///
/// Ordering matters: higher priorities sort after lower ones, and the
/// gossip layer uses the ordering for fanout scaling and queue preemption.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

/// Keyword-driven priority classifier
///
/// Maps substrings of keys or context hints to priorities. The table is
/// configurable so deployments are not tied to any fixed vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityClassifier {
    /// (keyword, priority) pairs checked in order; first match wins
    rules: Vec<(String, Priority)>,
}

impl Default for PriorityClassifier {
    fn default() -> Self {
        Self {
            rules: vec![
                ("emergency".to_string(), Priority::Critical),
                ("critical".to_string(), Priority::Critical),
                ("important".to_string(), Priority::High),
                ("routine".to_string(), Priority::Low),
            ],
        }
    }
}

impl PriorityClassifier {
    pub fn new(rules: Vec<(String, Priority)>) -> Self {
        Self { rules }
    }

    /// Classify a key or hint; unmatched input is `Medium`
    pub fn classify(&self, input: &str) -> Priority {
        for (keyword, priority) in &self.rules {
            if input.contains(keyword.as_str()) {
                return *priority;
            }
        }
        Priority::Medium
    }

    /// Add a rule in front of the existing table
    pub fn prepend_rule(&mut self, keyword: impl Into<String>, priority: Priority) {
        self.rules.insert(0, (keyword.into(), priority));
    }
}
