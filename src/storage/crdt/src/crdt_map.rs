use crate::entity::CrdtPayload;
use axon_core::AxonResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Map from string keys to nested CRDTs
///
/// Merging two maps merges same-keyed CRDTs recursively; keys present in
/// only one side are preserved. Merge fails only when the same key holds
/// different CRDT types on the two sides, which indicates an application
/// bug rather than a replication conflict.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrdtMap {
    entries: BTreeMap<String, CrdtPayload>,
}

impl CrdtMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, payload: CrdtPayload) {
        self.entries.insert(key.into(), payload);
    }

    pub fn get(&self, key: &str) -> Option<&CrdtPayload> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut CrdtPayload> {
        self.entries.get_mut(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CrdtPayload)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recursive merge; same-keyed entries merge, disjoint keys union
    pub fn merge(&mut self, other: &CrdtMap) -> AxonResult<()> {
        for (key, payload) in &other.entries {
            match self.entries.get_mut(key) {
                Some(existing) => existing.merge(payload)?,
                None => {
                    self.entries.insert(key.clone(), payload.clone());
                }
            }
        }
        Ok(())
    }
}
