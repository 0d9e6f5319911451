//! Canonical serialization for snapshot fingerprints.
//!
//! ## Determinism Guarantees
//!
//! - Stable field order: struct fields serialize in declaration order
//! - Stable Vec order: callers pass nodes and edges sorted by id
//! - No HashMap in hashed data

use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

use crate::types::{Edge, Node};

/// Serialize a value to canonical JSON bytes for hashing.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(value)
}

/// Compute canonical hash of a serializable value.
pub fn canonical_hash<T: Serialize>(value: &T) -> Result<u64, serde_json::Error> {
    let bytes = to_canonical_bytes(value)?;
    Ok(xxh64(&bytes, 0))
}

/// Compute canonical hash and return as hex string.
pub fn canonical_hash_hex<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(format!("{:016x}", canonical_hash(value)?))
}

#[derive(Serialize)]
struct SnapshotContent<'a> {
    nodes: &'a [Node],
    edges: &'a [Edge],
}

/// Fingerprint of a node/edge set, as stored alongside each version.
///
/// Order-sensitive: pass the id-sorted lists a version holds.
pub fn snapshot_fingerprint(nodes: &[Node], edges: &[Edge]) -> Result<String, serde_json::Error> {
    canonical_hash_hex(&SnapshotContent { nodes, edges })
}
