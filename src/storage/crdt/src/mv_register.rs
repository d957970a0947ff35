use crate::{Crdt, VectorClock};
use axon_core::AgentId;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt::Debug;

/// One concurrent sibling held by a multi-value register
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sibling<T> {
    pub value: T,
    pub clock: VectorClock,
    pub writer: AgentId,
}

/// Multi-value register (MV-Register)
///
/// Keeps every causally-concurrent write as a sibling; writes that are
/// dominated by a newer clock are dropped on merge. Reading returns the
/// full sibling set so the conflict resolver (or the application) can pick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MvRegister<T> {
    siblings: Vec<Sibling<T>>,
}

impl<T> MvRegister<T>
where
    T: Clone + Debug + PartialEq + Serialize + DeserializeOwned,
{
    pub fn new() -> Self {
        Self {
            siblings: Vec::new(),
        }
    }

    /// Write a value stamped with the writer's current clock
    ///
    /// The caller passes its clock *after* ticking for this event, so the
    /// write dominates every sibling it has observed.
    pub fn set(&mut self, value: T, writer: &AgentId, clock: VectorClock) {
        let incoming = Sibling {
            value,
            clock,
            writer: writer.clone(),
        };
        self.absorb(incoming);
        self.normalize();
    }

    /// Canonical sibling order keeps replicas byte-comparable
    fn normalize(&mut self) {
        self.siblings.sort_by(|a, b| {
            a.writer
                .cmp(&b.writer)
                .then(a.clock.version().cmp(&b.clock.version()))
        });
        self.siblings
            .dedup_by(|a, b| a.clock == b.clock && a.value == b.value);
    }

    fn absorb(&mut self, incoming: Sibling<T>) {
        // Drop siblings dominated by the incoming write
        self.siblings
            .retain(|existing| !incoming.clock.dominates(&existing.clock) || existing.clock == incoming.clock);

        let dominated_or_duplicate = self.siblings.iter().any(|existing| {
            existing.clock.dominates(&incoming.clock)
        });
        if !dominated_or_duplicate {
            self.siblings.push(incoming);
        }
    }

    /// All concurrent values
    pub fn get(&self) -> Vec<&T> {
        self.siblings.iter().map(|s| &s.value).collect()
    }

    pub fn siblings(&self) -> &[Sibling<T>] {
        &self.siblings
    }

    /// Single value when no conflict exists
    pub fn resolved(&self) -> Option<&T> {
        match self.siblings.len() {
            1 => Some(&self.siblings[0].value),
            _ => None,
        }
    }

    pub fn has_conflict(&self) -> bool {
        self.siblings.len() > 1
    }

    pub fn is_empty(&self) -> bool {
        self.siblings.is_empty()
    }

    /// Combined clock covering every sibling
    pub fn clock(&self, owner: &AgentId) -> VectorClock {
        let mut combined = VectorClock::new(owner.clone());
        for sibling in &self.siblings {
            combined.merge(&sibling.clock);
        }
        combined
    }
}

impl<T> Crdt for MvRegister<T>
where
    T: Clone + Debug + PartialEq + Serialize + DeserializeOwned,
{
    fn merge(&mut self, other: &Self) {
        for sibling in &other.siblings {
            self.absorb(sibling.clone());
        }
        self.normalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::laws;

    fn agent(s: &str) -> AgentId {
        AgentId::new(s)
    }

    fn ticked(owner: &AgentId) -> VectorClock {
        let mut clock = VectorClock::new(owner.clone());
        clock.increment();
        clock
    }

    #[test]
    fn test_single_write_is_resolved() {
        let a1 = agent("a1");
        let mut reg: MvRegister<String> = MvRegister::new();
        reg.set("hello".to_string(), &a1, ticked(&a1));

        assert_eq!(reg.resolved(), Some(&"hello".to_string()));
        assert!(!reg.has_conflict());
    }

    #[test]
    fn test_concurrent_writes_keep_both() {
        let a1 = agent("a1");
        let a2 = agent("a2");

        let mut r1: MvRegister<String> = MvRegister::new();
        r1.set("one".to_string(), &a1, ticked(&a1));

        let mut r2: MvRegister<String> = MvRegister::new();
        r2.set("two".to_string(), &a2, ticked(&a2));

        r1.merge(&r2);
        assert!(r1.has_conflict());
        let values = r1.get();
        assert!(values.contains(&&"one".to_string()));
        assert!(values.contains(&&"two".to_string()));
    }

    #[test]
    fn test_dominating_write_clears_siblings() {
        let a1 = agent("a1");
        let a2 = agent("a2");

        let mut r1: MvRegister<String> = MvRegister::new();
        r1.set("one".to_string(), &a1, ticked(&a1));
        let mut r2: MvRegister<String> = MvRegister::new();
        r2.set("two".to_string(), &a2, ticked(&a2));
        r1.merge(&r2);
        assert!(r1.has_conflict());

        // A write whose clock covers both siblings resolves the conflict
        let mut covering = r1.clock(&a1);
        covering.increment();
        r1.set("final".to_string(), &a1, covering);

        assert_eq!(r1.resolved(), Some(&"final".to_string()));
    }

    #[test]
    fn test_crdt_laws() {
        let a1 = agent("a1");
        let a2 = agent("a2");
        let a3 = agent("a3");

        let mut r1: MvRegister<i64> = MvRegister::new();
        r1.set(1, &a1, ticked(&a1));
        let mut r2: MvRegister<i64> = MvRegister::new();
        r2.set(2, &a2, ticked(&a2));
        let mut r3: MvRegister<i64> = MvRegister::new();
        r3.set(3, &a3, ticked(&a3));

        assert!(laws::converge(&[r1, r2, r3]));
    }
}
