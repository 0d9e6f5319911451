//! Versioned snapshot storage backends.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;

use crate::types::{Edge, GraphId, GraphVersion, Node, QualityReport, SessionId};

/// Number of versions `prune` keeps when callers have no preference.
pub const DEFAULT_KEEP_LAST: usize = 10;

/// Error type shared by all snapshot stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested version was never saved or has been pruned.
    #[error("Graph {graph_id} version {version} not found")]
    NotFound {
        /// Graph that was queried.
        graph_id: GraphId,
        /// Version that was queried.
        version: u64,
    },
    /// A conditional save found a different latest version.
    #[error("Graph {graph_id} is at version {actual}, expected {expected}")]
    VersionConflict {
        /// Graph being written.
        graph_id: GraphId,
        /// Latest version the caller based its write on (0 = none).
        expected: u64,
        /// Latest version actually stored (0 = none).
        actual: u64,
    },
    /// A stored snapshot no longer matches its content fingerprint.
    #[error("Graph {graph_id} version {version} is corrupt: {reason}")]
    Corrupt {
        /// Graph that was read.
        graph_id: GraphId,
        /// Version that was read.
        version: u64,
        /// What failed to verify.
        reason: String,
    },
    /// A snapshot listed the same node or edge id twice.
    #[error("Graph {graph_id}: duplicate {kind} id {id}")]
    DuplicateId {
        /// Graph being written.
        graph_id: GraphId,
        /// `"node"` or `"edge"`.
        kind: &'static str,
        /// The repeated id.
        id: String,
    },
    /// The store has been closed.
    #[error("Snapshot store is closed")]
    Closed,
    /// Payload encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Database error.
    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Whether this error reports a missing graph version.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Sort nodes and edges by id and reject repeated ids.
pub(crate) fn prepare_snapshot(
    graph_id: &GraphId,
    mut nodes: Vec<Node>,
    mut edges: Vec<Edge>,
) -> Result<(Vec<Node>, Vec<Edge>), StoreError> {
    nodes.sort_by(|a, b| a.id.cmp(&b.id));
    edges.sort_by(|a, b| a.id.cmp(&b.id));

    if let Some(pair) = nodes.windows(2).find(|pair| pair[0].id == pair[1].id) {
        return Err(StoreError::DuplicateId {
            graph_id: graph_id.clone(),
            kind: "node",
            id: pair[0].id.clone(),
        });
    }
    if let Some(pair) = edges.windows(2).find(|pair| pair[0].id == pair[1].id) {
        return Err(StoreError::DuplicateId {
            graph_id: graph_id.clone(),
            kind: "edge",
            id: pair[0].id.clone(),
        });
    }

    Ok((nodes, edges))
}

/// Append-only storage of full graph snapshots, one per version.
///
/// Implementations must guarantee:
/// - version numbers per graph are 1, 2, 3, ... with no gaps or repeats;
/// - a save either commits the header and every node and edge row, or
///   nothing is visible;
/// - two concurrent saves for the same graph never receive the same
///   version number, while saves for different graphs are independent;
/// - reads only ever observe fully committed snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Record that a graph exists. No-op if already known.
    async fn register_graph(&self, graph_id: &GraphId) -> Result<(), StoreError>;

    /// Highest-numbered version, or `None` if the graph was never saved.
    async fn latest(&self, graph_id: &GraphId) -> Result<Option<GraphVersion>, StoreError>;

    /// Exact version. Fails with [`StoreError::NotFound`] if absent.
    async fn load(&self, graph_id: &GraphId, version: u64) -> Result<GraphVersion, StoreError>;

    /// Persist the next version unconditionally.
    async fn save(
        &self,
        graph_id: &GraphId,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        author_session: Option<SessionId>,
        quality: QualityReport,
    ) -> Result<GraphVersion, StoreError>;

    /// Persist the next version only if the latest stored version is still
    /// `expected_latest` (0 meaning the graph has no versions yet).
    ///
    /// The check and the write are one atomic step; a mismatch fails with
    /// [`StoreError::VersionConflict`] and writes nothing.
    async fn save_if_latest(
        &self,
        graph_id: &GraphId,
        expected_latest: u64,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        author_session: Option<SessionId>,
        quality: QualityReport,
    ) -> Result<GraphVersion, StoreError>;

    /// Versions newest first, at most `limit` of them.
    async fn history(
        &self,
        graph_id: &GraphId,
        limit: Option<usize>,
    ) -> Result<Vec<GraphVersion>, StoreError>;

    /// Delete every version older than the `keep_last` most recent.
    ///
    /// Returns the number of versions removed.
    async fn prune(&self, graph_id: &GraphId, keep_last: usize) -> Result<usize, StoreError>;

    /// All registered graph ids, in order.
    async fn graph_ids(&self) -> Result<Vec<GraphId>, StoreError>;

    /// Number of versions currently retained for a graph.
    async fn version_count(&self, graph_id: &GraphId) -> Result<usize, StoreError>;

    /// Release underlying resources. Idempotent.
    async fn close(&self);
}

pub use memory::InMemorySnapshotStore;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresConfig, PostgresSnapshotStore};
