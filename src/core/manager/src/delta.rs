use axon_compress::{CompressedBlob, Compressor};
use axon_core::{AgentId, AxonError, AxonResult};
use axon_crdt::Operation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Integrity-framed batch of operations for one peer
///
/// The blob is the compressed MessagePack encoding of the operations; the
/// checksum covers the compressed blob bytes, and the Merkle root chains
/// the per-operation hashes in order. A receiver verifies both before
/// touching its store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaPackage {
    pub delta_id: Uuid,
    pub source: AgentId,
    pub targets: Vec<AgentId>,
    pub version: u64,
    pub merkle_root: String,
    pub blob: CompressedBlob,
    pub checksum: String,
    pub timestamp: DateTime<Utc>,
    /// Deltas that must be applied before this one
    pub dependencies: Vec<Uuid>,
}

/// Chained hash over per-operation hashes in receipt order
pub fn merkle_root(operations: &[Operation]) -> String {
    let mut hasher = blake3::Hasher::new();
    for op in operations {
        hasher.update(op.content_hash().as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// Package operations for shipment to `target`
pub fn build_delta(
    source: AgentId,
    target: AgentId,
    version: u64,
    operations: &[Operation],
    dependencies: Vec<Uuid>,
) -> AxonResult<DeltaPackage> {
    let serialized = rmp_serde::to_vec(operations)
        .map_err(|e| AxonError::internal(format!("delta encode failed: {}", e)))?;
    let blob = Compressor::compress_detached(&serialized)?;
    let checksum = blake3::hash(&blob.payload).to_hex().to_string();
    Ok(DeltaPackage {
        delta_id: Uuid::new_v4(),
        source,
        targets: vec![target],
        version,
        merkle_root: merkle_root(operations),
        blob,
        checksum,
        timestamp: Utc::now(),
        dependencies,
    })
}

/// Verify integrity and unpack the operations
///
/// Any mismatch — blob checksum, decompression, or Merkle root — reports
/// `InvalidDelta`; the caller increments `failed_syncs` and requests a
/// fresh anti-entropy round instead of applying anything.
pub fn open_delta(delta: &DeltaPackage) -> AxonResult<Vec<Operation>> {
    let actual_checksum = blake3::hash(&delta.blob.payload).to_hex().to_string();
    if actual_checksum != delta.checksum {
        return Err(AxonError::InvalidDelta {
            delta_id: delta.delta_id.to_string(),
            reason: format!(
                "blob checksum mismatch: expected {}, got {}",
                delta.checksum, actual_checksum
            ),
        });
    }

    let serialized =
        Compressor::decompress_detached(&delta.blob).map_err(|e| AxonError::InvalidDelta {
            delta_id: delta.delta_id.to_string(),
            reason: format!("blob did not decompress: {}", e),
        })?;

    let operations: Vec<Operation> =
        rmp_serde::from_slice(&serialized).map_err(|e| AxonError::InvalidDelta {
            delta_id: delta.delta_id.to_string(),
            reason: format!("operations did not decode: {}", e),
        })?;

    let actual_root = merkle_root(&operations);
    if actual_root != delta.merkle_root {
        return Err(AxonError::InvalidDelta {
            delta_id: delta.delta_id.to_string(),
            reason: format!(
                "merkle root mismatch: expected {}, got {}",
                delta.merkle_root, actual_root
            ),
        });
    }
    Ok(operations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_crdt::{EntryMetadata, OperationKind, VectorClock};

    fn agent(s: &str) -> AgentId {
        AgentId::new(s)
    }

    fn ops(n: usize) -> Vec<Operation> {
        let who = agent("a1");
        let mut clock = VectorClock::new(who.clone());
        (0..n)
            .map(|i| {
                clock.increment();
                Operation::new(
                    OperationKind::Set,
                    format!("user:{}", i),
                    Some(serde_json::json!({"seq": i})),
                    clock.clone(),
                    who.clone(),
                    EntryMetadata::new("user:x", who.clone()),
                )
            })
            .collect()
    }

    #[test]
    fn test_delta_roundtrip() {
        let operations = ops(5);
        let delta = build_delta(agent("a1"), agent("a2"), 7, &operations, vec![]).unwrap();
        assert_eq!(delta.version, 7);
        assert_eq!(delta.targets, vec![agent("a2")]);

        let unpacked = open_delta(&delta).unwrap();
        assert_eq!(unpacked, operations);
    }

    #[test]
    fn test_merkle_root_is_order_sensitive() {
        let operations = ops(3);
        let forward = merkle_root(&operations);
        let mut reversed = operations.clone();
        reversed.reverse();
        assert_ne!(forward, merkle_root(&reversed));
    }

    #[test]
    fn test_corrupted_blob_is_rejected() {
        let operations = ops(4);
        let mut delta = build_delta(agent("a1"), agent("a2"), 1, &operations, vec![]).unwrap();
        let mid = delta.blob.payload.len() / 2;
        delta.blob.payload[mid] ^= 0x01;

        let err = open_delta(&delta).unwrap_err();
        assert!(matches!(err, AxonError::InvalidDelta { .. }));
    }

    #[test]
    fn test_tampered_merkle_root_is_rejected() {
        let operations = ops(2);
        let mut delta = build_delta(agent("a1"), agent("a2"), 1, &operations, vec![]).unwrap();
        delta.merkle_root = "0".repeat(64);
        assert!(matches!(
            open_delta(&delta),
            Err(AxonError::InvalidDelta { .. })
        ));
    }

    #[test]
    fn test_empty_delta_is_valid() {
        let delta = build_delta(agent("a1"), agent("a2"), 0, &[], vec![]).unwrap();
        assert!(open_delta(&delta).unwrap().is_empty());
    }
}
