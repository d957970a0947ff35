use axon_core::{AxonError, AxonResult, ConflictStrategyKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

/// Operations gated by namespace access control
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceOp {
    Read,
    Write,
    Delete,
}

impl std::fmt::Display for NamespaceOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NamespaceOp::Read => write!(f, "read"),
            NamespaceOp::Write => write!(f, "write"),
            NamespaceOp::Delete => write!(f, "delete"),
        }
    }
}

/// Role-based access table
///
/// An empty table allows everything; once any role is listed, unlisted
/// roles are denied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessControl {
    roles: BTreeMap<String, BTreeSet<NamespaceOp>>,
}

impl AccessControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, role: impl Into<String>, ops: impl IntoIterator<Item = NamespaceOp>) -> Self {
        self.roles.entry(role.into()).or_default().extend(ops);
        self
    }

    pub fn allows(&self, role: &str, op: NamespaceOp) -> bool {
        if self.roles.is_empty() {
            return true;
        }
        self.roles.get(role).map_or(false, |ops| ops.contains(&op))
    }
}

/// Per-namespace replication and policy settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamespacePolicy {
    pub default_ttl: Option<Duration>,
    /// Overrides the topology-level replication factor when set
    pub replication_factor: Option<usize>,
    pub encrypt_at_rest: bool,
    /// Overrides the resolver's default strategy for keys in this namespace
    pub conflict_strategy: Option<ConflictStrategyKind>,
    pub access_control: AccessControl,
}

/// Namespace policy lookup, defaulting for unconfigured namespaces
#[derive(Debug, Clone, Default)]
pub struct NamespaceRegistry {
    policies: HashMap<String, NamespacePolicy>,
    fallback: NamespacePolicy,
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, namespace: impl Into<String>, policy: NamespacePolicy) {
        self.policies.insert(namespace.into(), policy);
    }

    pub fn policy_for(&self, namespace: &str) -> &NamespacePolicy {
        self.policies.get(namespace).unwrap_or(&self.fallback)
    }

    pub fn configured(&self) -> impl Iterator<Item = (&String, &NamespacePolicy)> {
        self.policies.iter()
    }

    /// Gate an operation; denial is final and emits no replication traffic
    pub fn check(&self, namespace: &str, role: &str, op: NamespaceOp) -> AxonResult<()> {
        if self.policy_for(namespace).access_control.allows(role, op) {
            Ok(())
        } else {
            Err(AxonError::Forbidden {
                role: role.to_string(),
                operation: op.to_string(),
                namespace: namespace.to_string(),
            })
        }
    }
}
