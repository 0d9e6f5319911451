//! # graph-collab-kernel
//!
//! Versioned, collaboratively edited graphs.
//!
//! Clients submit [`GraphOperation`]s computed against a specific graph
//! version. The [`CollaborationEngine`] applies each accepted operation to the
//! latest snapshot, evaluates structural quality, and persists the result as a
//! new immutable [`GraphVersion`].
//!
//! ## Architecture
//!
//! ```text
//! GraphOperation → CollaborationEngine → WorkingGraph → QualityAnalyzer
//!                          ↓                                   ↓
//!                   SessionRegistry          SnapshotStore (Postgres or Memory)
//! ```
//!
//! ## Guarantees
//!
//! - Version numbers per graph are 1, 2, 3, ... and never reused
//! - A rejected operation persists nothing
//! - Every version committed through the engine satisfies referential
//!   integrity: each edge endpoint names a node of the same snapshot.
//!   Direct [`SnapshotStore::save`] calls are not checked
//! - Snapshot content is fingerprinted and verified on load

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod quality;
pub mod canonical;
pub mod store;
pub mod session;
pub mod engine;
pub mod telemetry;

// Re-exports
pub use types::{
    Edge, EdgePatch, ElementRef, GraphId, GraphOperation, GraphRename, GraphVersion, Node,
    NodePatch, OperationKind, PayloadError, QualityReport, SessionId, TrustSummary,
};
pub use quality::QualityAnalyzer;
pub use canonical::{canonical_hash, canonical_hash_hex, snapshot_fingerprint, to_canonical_bytes};
pub use store::{InMemorySnapshotStore, SnapshotStore, StoreError, DEFAULT_KEEP_LAST};
#[cfg(feature = "postgres")]
pub use store::{PostgresConfig, PostgresSnapshotStore};
pub use session::{SessionRecord, SessionRegistry};
pub use engine::{CollabError, CollaborationEngine, EngineConfig, IntegrityViolation};
pub use telemetry::{init_tracing, LogFormat};
