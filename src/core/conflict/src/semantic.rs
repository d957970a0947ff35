use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Policy for merging conflicting numeric leaves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberPolicy {
    Max,
    Min,
    Avg,
    Lww,
}

/// Schema hints steering the semantic merge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeSchema {
    /// Field used as element identity when unioning arrays of objects
    pub array_identity_key: Option<String>,
    pub number_policy: NumberPolicy,
}

impl Default for MergeSchema {
    fn default() -> Self {
        Self {
            array_identity_key: None,
            number_policy: NumberPolicy::Lww,
        }
    }
}

/// Result of a semantic merge: the value plus a confidence that decays with
/// every leaf that had to be decided heuristically
#[derive(Debug, Clone)]
pub struct SemanticMerge {
    pub value: Value,
    pub confidence: f64,
    pub contested_leaves: usize,
}

/// Recursively merge two JSON documents
///
/// - Objects: union of fields; same-keyed conflicts recurse.
/// - Arrays: union by the schema's identity key when present, otherwise
///   unique concatenation in local-then-remote order.
/// - Strings: three-way line merge against the common ancestor.
/// - Numbers: schema policy (max/min/avg/lww).
/// - Shape mismatches: last writer wins, low confidence.
pub fn merge_values(
    local: &Value,
    remote: &Value,
    ancestor: Option<&Value>,
    schema: &MergeSchema,
    local_ts: DateTime<Utc>,
    remote_ts: DateTime<Utc>,
) -> SemanticMerge {
    let mut contested = 0usize;
    let value = merge_inner(
        local,
        remote,
        ancestor,
        schema,
        local_ts,
        remote_ts,
        &mut contested,
    );
    // Every contested leaf shaves confidence
    let confidence = 0.95_f64 * 0.9_f64.powi(contested as i32);
    SemanticMerge {
        value,
        confidence,
        contested_leaves: contested,
    }
}

fn merge_inner(
    local: &Value,
    remote: &Value,
    ancestor: Option<&Value>,
    schema: &MergeSchema,
    local_ts: DateTime<Utc>,
    remote_ts: DateTime<Utc>,
    contested: &mut usize,
) -> Value {
    if local == remote {
        return local.clone();
    }
    match (local, remote) {
        (Value::Object(l), Value::Object(r)) => {
            merge_objects(l, r, ancestor, schema, local_ts, remote_ts, contested)
        }
        (Value::Array(l), Value::Array(r)) => merge_arrays(l, r, schema),
        (Value::String(l), Value::String(r)) => {
            let base = ancestor.and_then(|a| a.as_str());
            merge_strings(l, r, base, local_ts, remote_ts, contested)
        }
        (Value::Number(_), Value::Number(_)) => {
            merge_numbers(local, remote, schema, local_ts, remote_ts, contested)
        }
        _ => {
            // Shape mismatch: take the later writer
            *contested += 1;
            if remote_ts > local_ts {
                remote.clone()
            } else {
                local.clone()
            }
        }
    }
}

fn merge_objects(
    local: &Map<String, Value>,
    remote: &Map<String, Value>,
    ancestor: Option<&Value>,
    schema: &MergeSchema,
    local_ts: DateTime<Utc>,
    remote_ts: DateTime<Utc>,
    contested: &mut usize,
) -> Value {
    let mut merged = Map::new();
    let keys: BTreeSet<&String> = local.keys().chain(remote.keys()).collect();
    for key in keys {
        let field_ancestor = ancestor.and_then(|a| a.get(key));
        let value = match (local.get(key), remote.get(key)) {
            (Some(l), Some(r)) => merge_inner(
                l,
                r,
                field_ancestor,
                schema,
                local_ts,
                remote_ts,
                contested,
            ),
            (Some(l), None) => l.clone(),
            (None, Some(r)) => r.clone(),
            (None, None) => unreachable!("key drawn from union"),
        };
        merged.insert(key.clone(), value);
    }
    Value::Object(merged)
}

fn merge_arrays(local: &[Value], remote: &[Value], schema: &MergeSchema) -> Value {
    if let Some(identity) = &schema.array_identity_key {
        // Union by identity: local order first, remote-only elements appended
        let mut merged: Vec<Value> = local.to_vec();
        for candidate in remote {
            let id = candidate.get(identity);
            let exists = id.is_some()
                && merged
                    .iter()
                    .any(|existing| existing.get(identity) == id);
            if !exists && !merged.contains(candidate) {
                merged.push(candidate.clone());
            }
        }
        Value::Array(merged)
    } else {
        // Unique concatenation preserving first-seen order
        let mut merged: Vec<Value> = local.to_vec();
        for candidate in remote {
            if !merged.contains(candidate) {
                merged.push(candidate.clone());
            }
        }
        Value::Array(merged)
    }
}

fn merge_strings(
    local: &str,
    remote: &str,
    ancestor: Option<&str>,
    local_ts: DateTime<Utc>,
    remote_ts: DateTime<Utc>,
    contested: &mut usize,
) -> Value {
    if let Some(base) = ancestor {
        // Three-way: a side equal to the ancestor concedes to the other
        if local == base {
            return Value::String(remote.to_string());
        }
        if remote == base {
            return Value::String(local.to_string());
        }
        // Both diverged: line-level union, local lines first; base lines
        // dropped by both sides never re-enter
        let mut merged: Vec<&str> = Vec::new();
        for line in local.lines().chain(remote.lines()) {
            if !merged.contains(&line) {
                merged.push(line);
            }
        }
        *contested += 1;
        return Value::String(merged.join("\n"));
    }
    // No ancestor: later writer wins
    *contested += 1;
    if remote_ts > local_ts {
        Value::String(remote.to_string())
    } else {
        Value::String(local.to_string())
    }
}

fn merge_numbers(
    local: &Value,
    remote: &Value,
    schema: &MergeSchema,
    local_ts: DateTime<Utc>,
    remote_ts: DateTime<Utc>,
    contested: &mut usize,
) -> Value {
    let l = local.as_f64().unwrap_or(0.0);
    let r = remote.as_f64().unwrap_or(0.0);
    let merged = match schema.number_policy {
        NumberPolicy::Max => l.max(r),
        NumberPolicy::Min => l.min(r),
        NumberPolicy::Avg => (l + r) / 2.0,
        NumberPolicy::Lww => {
            *contested += 1;
            if remote_ts > local_ts {
                r
            } else {
                l
            }
        }
    };
    // Preserve integer representation when both sides were integral
    if local.is_i64() && remote.is_i64() && merged.fract() == 0.0 {
        Value::from(merged as i64)
    } else {
        serde_json::Number::from_f64(merged)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
