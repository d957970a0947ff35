use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;

pub mod crdt_map;
pub mod entity;
pub mod entry;
pub mod gcounter;
pub mod lww_register;
pub mod mv_register;
pub mod oplog;
pub mod or_set;
pub mod pn_counter;
pub mod vector_clock;

pub use crdt_map::*;
pub use entity::*;
pub use entry::*;
pub use gcounter::*;
pub use lww_register::*;
pub use mv_register::*;
pub use oplog::*;
pub use or_set::*;
pub use pn_counter::*;
pub use vector_clock::*;

/// Conflict-free replicated data types for AXON
///
/// Every type here offers a merge that is associative, commutative, and
/// idempotent, so any two replicas that observe the same set of operations
/// converge to the same state regardless of delivery order. Causality is
/// tracked with vector clocks; divergence ships as operations through the
/// operation log.

/// Core merge contract shared by all CRDT primitives
///
/// `merge` must satisfy: a ⊔ b = b ⊔ a, (a ⊔ b) ⊔ c = a ⊔ (b ⊔ c), a ⊔ a = a.
pub trait Crdt: Clone + Debug + PartialEq + Serialize + DeserializeOwned {
    /// Merge another replica's state into this one
    fn merge(&mut self, other: &Self);

    /// Merge by value
    fn merged(mut self, other: &Self) -> Self {
        self.merge(other);
        self
    }

    /// Content hash for deduplication and sync summaries
    fn content_hash(&self) -> blake3::Hash {
        let serialized = rmp_serde::to_vec(self).unwrap_or_default();
        blake3::hash(&serialized)
    }
}

/// Law-check helpers for CRDT merge semantics
///
/// Used by unit and property tests across the workspace; exported so
/// downstream crates can assert the same laws over their own compositions.
pub mod laws {
    use super::Crdt;

    /// a ⊔ a = a
    pub fn idempotent<T: Crdt>(a: &T) -> bool {
        let merged = a.clone().merged(a);
        merged == *a
    }

    /// a ⊔ b = b ⊔ a
    pub fn commutative<T: Crdt>(a: &T, b: &T) -> bool {
        let ab = a.clone().merged(b);
        let ba = b.clone().merged(a);
        ab == ba
    }

    /// (a ⊔ b) ⊔ c = a ⊔ (b ⊔ c)
    pub fn associative<T: Crdt>(a: &T, b: &T, c: &T) -> bool {
        let left = a.clone().merged(b).merged(c);
        let right = a.clone().merged(&b.clone().merged(c));
        left == right
    }

    /// All three laws over every pair/triplet in the slice
    pub fn converge<T: Crdt>(replicas: &[T]) -> bool {
        for a in replicas {
            if !idempotent(a) {
                return false;
            }
        }
        for a in replicas {
            for b in replicas {
                if !commutative(a, b) {
                    return false;
                }
            }
        }
        for a in replicas {
            for b in replicas {
                for c in replicas {
                    if !associative(a, b, c) {
                        return false;
                    }
                }
            }
        }
        true
    }
}
