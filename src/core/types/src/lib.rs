use serde::{Deserialize, Serialize};
use std::fmt;

pub mod config;
pub mod error;
pub mod frame;
pub mod hooks;
pub mod meta;
pub mod priority;

pub use config::*;
pub use error::{AxonError, AxonResult};
pub use frame::*;
pub use hooks::*;
pub use meta::MetaValue;
pub use priority::*;

/// Shared core types for the AXON memory coordination substrate
///
/// Everything in this crate is transport- and storage-agnostic: identity,
/// the error tree, configuration, the host hook traits, and the wire frame
/// codec. Component crates (crdt, compress, conflict, shard, gossip,
/// manager) build on these without back-references.

/// Unique identity of an agent within the swarm
///
/// A UTF-8 string, stable for the lifetime of the process. Agent ids are
/// used as vector-clock entries, gossip addresses, and shard owners, so
/// ordering and hashing must be deterministic across replicas.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
