use crate::{Crdt, CrdtMap, GCounter, LwwRegister, MvRegister, OrSet, PnCounter, VectorClock};
use axon_core::{AgentId, AxonError, AxonResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// CRDT type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrdtKind {
    GCounter,
    PnCounter,
    OrSet,
    LwwRegister,
    MvRegister,
    Map,
}

impl std::fmt::Display for CrdtKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CrdtKind::GCounter => "g_counter",
            CrdtKind::PnCounter => "pn_counter",
            CrdtKind::OrSet => "or_set",
            CrdtKind::LwwRegister => "lww_register",
            CrdtKind::MvRegister => "mv_register",
            CrdtKind::Map => "crdt_map",
        };
        write!(f, "{}", name)
    }
}

/// Concrete CRDT state carried by an entity
///
/// Set elements and map keys are strings; register values are arbitrary
/// JSON documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CrdtPayload {
    GCounter(GCounter),
    PnCounter(PnCounter),
    OrSet(OrSet<String>),
    LwwRegister(LwwRegister<Value>),
    MvRegister(MvRegister<Value>),
    Map(CrdtMap),
}

impl CrdtPayload {
    pub fn kind(&self) -> CrdtKind {
        match self {
            CrdtPayload::GCounter(_) => CrdtKind::GCounter,
            CrdtPayload::PnCounter(_) => CrdtKind::PnCounter,
            CrdtPayload::OrSet(_) => CrdtKind::OrSet,
            CrdtPayload::LwwRegister(_) => CrdtKind::LwwRegister,
            CrdtPayload::MvRegister(_) => CrdtKind::MvRegister,
            CrdtPayload::Map(_) => CrdtKind::Map,
        }
    }

    /// Merge same-typed payloads; differing types are an error
    pub fn merge(&mut self, other: &CrdtPayload) -> AxonResult<()> {
        match (self, other) {
            (CrdtPayload::GCounter(a), CrdtPayload::GCounter(b)) => {
                a.merge(b);
                Ok(())
            }
            (CrdtPayload::PnCounter(a), CrdtPayload::PnCounter(b)) => {
                a.merge(b);
                Ok(())
            }
            (CrdtPayload::OrSet(a), CrdtPayload::OrSet(b)) => {
                a.merge(b);
                Ok(())
            }
            (CrdtPayload::LwwRegister(a), CrdtPayload::LwwRegister(b)) => {
                a.merge(b);
                Ok(())
            }
            (CrdtPayload::MvRegister(a), CrdtPayload::MvRegister(b)) => {
                a.merge(b);
                Ok(())
            }
            (CrdtPayload::Map(a), CrdtPayload::Map(b)) => a.merge(b),
            (a, b) => Err(AxonError::internal(format!(
                "crdt type mismatch: {} vs {}",
                a.kind(),
                b.kind()
            ))),
        }
    }
}

/// A replicated CRDT instance with identity and causal metadata
///
/// Entities are created lazily on first operation and live until explicit
/// garbage collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrdtEntity {
    pub id: String,
    pub owner: AgentId,
    pub created_at: DateTime<Utc>,
    pub version: u64,
    pub clock: VectorClock,
    pub payload: CrdtPayload,
}

impl CrdtEntity {
    pub fn new(id: impl Into<String>, owner: AgentId, payload: CrdtPayload) -> Self {
        Self {
            id: id.into(),
            owner: owner.clone(),
            created_at: Utc::now(),
            version: 0,
            clock: VectorClock::new(owner),
            payload,
        }
    }

    pub fn kind(&self) -> CrdtKind {
        self.payload.kind()
    }

    /// Tick causal state after a local mutation of the payload
    pub fn record_local_mutation(&mut self) {
        self.clock.increment();
        self.version += 1;
    }

    /// Merge a remote replica of the same entity
    pub fn merge(&mut self, other: &CrdtEntity) -> AxonResult<()> {
        if self.id != other.id {
            return Err(AxonError::internal(format!(
                "entity id mismatch: '{}' vs '{}'",
                self.id, other.id
            )));
        }
        self.payload.merge(&other.payload)?;
        self.clock.merge(&other.clock);
        self.version = self.version.max(other.version) + 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(s: &str) -> AgentId {
        AgentId::new(s)
    }

    #[test]
    fn test_entity_lazy_creation_and_mutation() {
        let mut counter = GCounter::new();
        counter.increment(&agent("a1"), 1);
        let mut entity = CrdtEntity::new("hits", agent("a1"), CrdtPayload::GCounter(counter));
        assert_eq!(entity.kind(), CrdtKind::GCounter);
        assert_eq!(entity.version, 0);

        entity.record_local_mutation();
        assert_eq!(entity.version, 1);
        assert_eq!(entity.clock.get(&agent("a1")), 1);
    }

    #[test]
    fn test_entity_merge_is_convergent() {
        let mut c1 = GCounter::new();
        c1.increment(&agent("a1"), 2);
        let mut e1 = CrdtEntity::new("hits", agent("a1"), CrdtPayload::GCounter(c1));
        e1.record_local_mutation();

        let mut c2 = GCounter::new();
        c2.increment(&agent("a2"), 3);
        let mut e2 = CrdtEntity::new("hits", agent("a2"), CrdtPayload::GCounter(c2));
        e2.record_local_mutation();

        let mut left = e1.clone();
        left.merge(&e2).unwrap();
        let mut right = e2.clone();
        right.merge(&e1).unwrap();

        assert_eq!(left.payload, right.payload);
        match left.payload {
            CrdtPayload::GCounter(ref c) => assert_eq!(c.value(), 5),
            ref other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_entity_merge_rejects_mismatched_ids() {
        let mut e1 = CrdtEntity::new("a", agent("a1"), CrdtPayload::GCounter(GCounter::new()));
        let e2 = CrdtEntity::new("b", agent("a2"), CrdtPayload::GCounter(GCounter::new()));
        assert!(e1.merge(&e2).is_err());
    }

    #[test]
    fn test_entity_merge_rejects_mismatched_types() {
        let mut e1 = CrdtEntity::new("k", agent("a1"), CrdtPayload::GCounter(GCounter::new()));
        let e2 = CrdtEntity::new("k", agent("a2"), CrdtPayload::PnCounter(PnCounter::new()));
        assert!(e1.merge(&e2).is_err());
    }
}
