use crate::Crdt;
use axon_core::AgentId;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

/// Globally-unique tag attached to each add
///
/// `(agent, seq)` where `seq` is drawn from the set's per-agent counter, so
/// two adds of the same element are distinguishable across replicas.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AddTag {
    pub agent: AgentId,
    pub seq: u64,
}

/// Observed-remove set (OR-Set)
///
/// Adds attach unique tags; a remove tombstones exactly the tags observed
/// at that moment. An element is a member while it has at least one live
/// tag, so an add concurrent with a remove survives it (add wins).
/// Removal is tombstone-only: tags are never physically deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrSet<T: Ord> {
    added: BTreeMap<T, BTreeSet<AddTag>>,
    removed: BTreeMap<T, BTreeSet<AddTag>>,
    next_seq: BTreeMap<AgentId, u64>,
}

impl<T> OrSet<T>
where
    T: Clone + Ord + Debug + Serialize + DeserializeOwned,
{
    pub fn new() -> Self {
        Self {
            added: BTreeMap::new(),
            removed: BTreeMap::new(),
            next_seq: BTreeMap::new(),
        }
    }

    /// Add an element, returning the freshly-minted tag
    pub fn add(&mut self, element: T, agent: &AgentId) -> AddTag {
        let seq = self.next_seq.entry(agent.clone()).or_insert(0);
        *seq += 1;
        let tag = AddTag {
            agent: agent.clone(),
            seq: *seq,
        };
        self.added.entry(element).or_default().insert(tag.clone());
        tag
    }

    /// Tombstone every currently-observed tag of the element
    ///
    /// Tags added by peers but not yet observed here are unaffected, which
    /// is what makes concurrent adds win.
    pub fn remove(&mut self, element: &T) {
        if let Some(tags) = self.added.get(element) {
            self.removed
                .entry(element.clone())
                .or_default()
                .extend(tags.iter().cloned());
        }
    }

    /// Live tags for an element: added minus tombstoned
    fn live_tags(&self, element: &T) -> Option<BTreeSet<&AddTag>> {
        let added = self.added.get(element)?;
        let removed = self.removed.get(element);
        let live: BTreeSet<&AddTag> = added
            .iter()
            .filter(|tag| removed.map_or(true, |r| !r.contains(*tag)))
            .collect();
        Some(live)
    }

    pub fn contains(&self, element: &T) -> bool {
        self.live_tags(element).map_or(false, |tags| !tags.is_empty())
    }

    /// Current members
    pub fn elements(&self) -> Vec<&T> {
        self.added
            .keys()
            .filter(|element| self.contains(element))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.added
            .keys()
            .filter(|element| self.contains(element))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Crdt for OrSet<T>
where
    T: Clone + Ord + Debug + Serialize + DeserializeOwned,
{
    fn merge(&mut self, other: &Self) {
        for (element, tags) in &other.added {
            self.added
                .entry(element.clone())
                .or_default()
                .extend(tags.iter().cloned());
        }
        for (element, tags) in &other.removed {
            self.removed
                .entry(element.clone())
                .or_default()
                .extend(tags.iter().cloned());
        }
        for (agent, &seq) in &other.next_seq {
            let current = self.next_seq.entry(agent.clone()).or_insert(0);
            *current = (*current).max(seq);
        }
    }
}
