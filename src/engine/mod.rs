//! Collaboration engine: the only write path into a snapshot store.
//!
//! ## Commit path
//!
//! ```text
//! GraphOperation → latest snapshot → version check → WorkingGraph.apply
//!                → QualityAnalyzer.evaluate → store.save_if_latest → SessionRegistry.upsert
//! ```
//!
//! Concurrency is optimistic. An operation names the version it was computed
//! against; if that is not the latest version the operation is rejected with
//! [`CollabError::VersionConflict`]. The final write is a compare-and-swap on
//! the same base version, so of two callers racing from one base exactly one
//! commits and the other gets a conflict. Nothing is retried here.

mod working;

pub use working::IntegrityViolation;

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::quality::QualityAnalyzer;
use crate::session::{SessionRecord, SessionRegistry};
use crate::store::{InMemorySnapshotStore, SnapshotStore, StoreError};
use crate::types::{GraphId, GraphOperation, GraphVersion, PayloadError, SessionId};
use working::WorkingGraph;

/// Attempts `current_graph` makes to publish a bootstrap version.
const BOOTSTRAP_ATTEMPTS: usize = 8;

/// Error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum CollabError {
    /// The operation was computed against a version that is no longer latest.
    #[error("Version conflict on graph {graph_id}: current version is {current}, operation targets {submitted}")]
    VersionConflict {
        /// Graph the operation targeted.
        graph_id: GraphId,
        /// Version the operation had to target.
        current: u64,
        /// Version the operation declared.
        submitted: u64,
    },
    /// The operation references a missing node or edge.
    #[error("Referential integrity error: {0}")]
    ReferentialIntegrity(#[from] IntegrityViolation),
    /// Unknown operation kind.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
    /// Payload failed schema validation.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    /// Persistence failure, passed through unmodified.
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl CollabError {
    /// Whether this is a version conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }

    /// Whether the requested graph version does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_not_found())
    }
}

impl From<StoreError> for CollabError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::VersionConflict { graph_id, expected, actual } => Self::VersionConflict {
                graph_id,
                current: actual,
                submitted: expected,
            },
            other => Self::Store(other),
        }
    }
}

impl From<PayloadError> for CollabError {
    fn from(e: PayloadError) -> Self {
        match e {
            PayloadError::Unsupported(op_type) => Self::UnsupportedOperation(op_type),
            invalid @ PayloadError::Invalid { .. } => Self::InvalidPayload(invalid.to_string()),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Versions to retain per graph after each commit. `None` keeps all.
    pub keep_last: Option<usize>,
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// - `GRAPH_KEEP_LAST`: versions retained per graph (unset = keep all)
    pub fn from_env() -> Self {
        Self {
            keep_last: std::env::var("GRAPH_KEEP_LAST")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }

    /// Retain at most `keep_last` versions per graph.
    pub fn with_keep_last(mut self, keep_last: usize) -> Self {
        self.keep_last = Some(keep_last);
        self
    }
}

/// Applies client operations to versioned graphs.
pub struct CollaborationEngine<S: SnapshotStore> {
    store: Arc<S>,
    sessions: Arc<SessionRegistry>,
    analyzer: QualityAnalyzer,
    config: EngineConfig,
}

impl CollaborationEngine<InMemorySnapshotStore> {
    /// Engine over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemorySnapshotStore::new()))
    }
}

impl<S: SnapshotStore> CollaborationEngine<S> {
    /// Create an engine with its own session registry.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_sessions(store, Arc::new(SessionRegistry::new()))
    }

    /// Create an engine sharing an existing session registry.
    pub fn with_sessions(store: Arc<S>, sessions: Arc<SessionRegistry>) -> Self {
        Self {
            store,
            sessions,
            analyzer: QualityAnalyzer::new(),
            config: EngineConfig::default(),
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The session registry.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Latest snapshot, bootstrapping an empty version if the graph has none.
    pub async fn current_graph(&self, graph_id: &GraphId) -> Result<GraphVersion, CollabError> {
        let mut expected = 0;
        for _ in 0..BOOTSTRAP_ATTEMPTS {
            if let Some(latest) = self.store.latest(graph_id).await? {
                return Ok(latest);
            }

            let quality = self.analyzer.evaluate(&[], &[]);
            match self
                .store
                .save_if_latest(graph_id, expected, Vec::new(), Vec::new(), None, quality)
                .await
            {
                Ok(bootstrap) => {
                    tracing::info!(
                        graph_id = %graph_id,
                        version = bootstrap.version,
                        "Bootstrapped empty graph"
                    );
                    return Ok(bootstrap);
                }
                // Another caller bootstrapped first, or history was pruned to nothing.
                Err(StoreError::VersionConflict { actual, .. }) => expected = actual,
                Err(e) => return Err(e.into()),
            }
        }

        Err(CollabError::VersionConflict {
            graph_id: graph_id.clone(),
            current: expected,
            submitted: 0,
        })
    }

    /// Apply one operation and persist the result as the next version.
    pub async fn apply(
        &self,
        graph_id: &GraphId,
        operation: &GraphOperation,
    ) -> Result<GraphVersion, CollabError> {
        operation.kind.validate()?;
        let base = self.current_graph(graph_id).await?;

        tracing::debug!(
            graph_id = %graph_id,
            session_id = %operation.session_id,
            op = operation.kind.type_name(),
            base_version = base.version,
            "Applying operation"
        );

        self.check_version(graph_id, base.version, operation.version)?;

        let mut working = WorkingGraph::from_version(&base);
        working
            .apply(&operation.kind)
            .map_err(|violation| self.reject(graph_id, violation))?;

        let committed = self
            .commit(graph_id, base.version, working, Some(operation.session_id.clone()))
            .await?;
        self.sessions
            .upsert(&operation.session_id, graph_id, committed.version);

        Ok(committed)
    }

    /// Apply a sequence of operations as one batch and persist one version.
    ///
    /// Operation `i` must declare `base.version + i`. Any mismatch or
    /// integrity failure aborts the whole batch before anything is written.
    /// An empty batch returns the current snapshot unchanged.
    pub async fn bulk_apply(
        &self,
        graph_id: &GraphId,
        operations: &[GraphOperation],
    ) -> Result<GraphVersion, CollabError> {
        for operation in operations {
            operation.kind.validate()?;
        }

        let base = self.current_graph(graph_id).await?;
        let Some(last) = operations.last() else {
            return Ok(base);
        };

        let mut working = WorkingGraph::from_version(&base);
        let mut expected = base.version;
        for operation in operations {
            self.check_version(graph_id, expected, operation.version)?;
            working
                .apply(&operation.kind)
                .map_err(|violation| self.reject(graph_id, violation))?;
            expected += 1;
        }

        tracing::debug!(
            graph_id = %graph_id,
            operations = operations.len(),
            base_version = base.version,
            "Applying batch"
        );

        let committed = self
            .commit(graph_id, base.version, working, Some(last.session_id.clone()))
            .await?;

        let submitters: BTreeSet<&SessionId> = operations.iter().map(|op| &op.session_id).collect();
        for session_id in submitters {
            self.sessions.upsert(session_id, graph_id, committed.version);
        }

        Ok(committed)
    }

    /// Every tracked session and the version it last produced.
    pub fn active_sessions(&self) -> Vec<SessionRecord> {
        self.sessions.all()
    }

    /// Stop tracking a session.
    pub fn end_session(&self, session_id: &SessionId) -> Option<SessionRecord> {
        self.sessions.remove(session_id)
    }

    /// Stored versions, newest first.
    pub async fn history(
        &self,
        graph_id: &GraphId,
        limit: Option<usize>,
    ) -> Result<Vec<GraphVersion>, CollabError> {
        Ok(self.store.history(graph_id, limit).await?)
    }

    /// One stored version.
    pub async fn version(&self, graph_id: &GraphId, version: u64) -> Result<GraphVersion, CollabError> {
        Ok(self.store.load(graph_id, version).await?)
    }

    /// Drop all but the `keep_last` newest versions of a graph.
    pub async fn prune(&self, graph_id: &GraphId, keep_last: usize) -> Result<usize, CollabError> {
        Ok(self.store.prune(graph_id, keep_last).await?)
    }

    /// Forget all sessions and close the store.
    pub async fn shutdown(&self) {
        self.sessions.clear();
        self.store.close().await;
    }

    fn check_version(&self, graph_id: &GraphId, current: u64, submitted: u64) -> Result<(), CollabError> {
        if submitted == current {
            return Ok(());
        }
        tracing::warn!(
            graph_id = %graph_id,
            current,
            submitted,
            "Rejected operation with stale version"
        );
        Err(CollabError::VersionConflict {
            graph_id: graph_id.clone(),
            current,
            submitted,
        })
    }

    fn reject(&self, graph_id: &GraphId, violation: IntegrityViolation) -> CollabError {
        tracing::warn!(graph_id = %graph_id, %violation, "Rejected operation");
        CollabError::ReferentialIntegrity(violation)
    }

    async fn commit(
        &self,
        graph_id: &GraphId,
        base_version: u64,
        working: WorkingGraph,
        author_session: Option<SessionId>,
    ) -> Result<GraphVersion, CollabError> {
        let (nodes, edges) = working.into_parts();
        let quality = self.analyzer.evaluate(&nodes, &edges);

        let committed = match self
            .store
            .save_if_latest(graph_id, base_version, nodes, edges, author_session, quality)
            .await
        {
            Ok(committed) => committed,
            Err(e @ StoreError::VersionConflict { .. }) => {
                tracing::warn!(graph_id = %graph_id, error = %e, "Lost commit race");
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            graph_id = %graph_id,
            version = committed.version,
            nodes = committed.nodes.len(),
            edges = committed.edges.len(),
            cycles = committed.quality.cycles.len(),
            "Committed graph version"
        );

        // The version is durable at this point; retention is best-effort.
        if let Some(keep_last) = self.config.keep_last {
            if let Err(e) = self.store.prune(graph_id, keep_last.max(1)).await {
                tracing::warn!(
                    graph_id = %graph_id,
                    version = committed.version,
                    error = %e,
                    "Failed to prune history after commit"
                );
            }
        }

        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Edge, EdgePatch, ElementRef, GraphRename, Node, NodePatch, OperationKind, QualityReport};
    use async_trait::async_trait;

    /// In-memory store whose `prune` always fails.
    #[derive(Default)]
    struct UnprunableStore {
        inner: InMemorySnapshotStore,
    }

    #[async_trait]
    impl SnapshotStore for UnprunableStore {
        async fn register_graph(&self, graph_id: &GraphId) -> Result<(), StoreError> {
            self.inner.register_graph(graph_id).await
        }

        async fn latest(&self, graph_id: &GraphId) -> Result<Option<GraphVersion>, StoreError> {
            self.inner.latest(graph_id).await
        }

        async fn load(&self, graph_id: &GraphId, version: u64) -> Result<GraphVersion, StoreError> {
            self.inner.load(graph_id, version).await
        }

        async fn save(
            &self,
            graph_id: &GraphId,
            nodes: Vec<Node>,
            edges: Vec<Edge>,
            author_session: Option<SessionId>,
            quality: QualityReport,
        ) -> Result<GraphVersion, StoreError> {
            self.inner.save(graph_id, nodes, edges, author_session, quality).await
        }

        async fn save_if_latest(
            &self,
            graph_id: &GraphId,
            expected_latest: u64,
            nodes: Vec<Node>,
            edges: Vec<Edge>,
            author_session: Option<SessionId>,
            quality: QualityReport,
        ) -> Result<GraphVersion, StoreError> {
            self.inner
                .save_if_latest(graph_id, expected_latest, nodes, edges, author_session, quality)
                .await
        }

        async fn history(
            &self,
            graph_id: &GraphId,
            limit: Option<usize>,
        ) -> Result<Vec<GraphVersion>, StoreError> {
            self.inner.history(graph_id, limit).await
        }

        async fn prune(&self, _graph_id: &GraphId, _keep_last: usize) -> Result<usize, StoreError> {
            Err(StoreError::Closed)
        }

        async fn graph_ids(&self) -> Result<Vec<GraphId>, StoreError> {
            self.inner.graph_ids().await
        }

        async fn version_count(&self, graph_id: &GraphId) -> Result<usize, StoreError> {
            self.inner.version_count(graph_id).await
        }

        async fn close(&self) {
            self.inner.close().await
        }
    }

    fn op(kind: OperationKind, version: u64) -> GraphOperation {
        GraphOperation::new(kind, "s1", version)
    }

    #[tokio::test]
    async fn test_current_graph_bootstraps_once() {
        let engine = CollaborationEngine::in_memory();
        let g = GraphId::from("g");

        let first = engine.current_graph(&g).await.unwrap();
        let second = engine.current_graph(&g).await.unwrap();

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 1);
        assert!(first.nodes.is_empty());
        assert!(first.author_session.is_none());
        assert_eq!(engine.store().version_count(&g).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected_without_write() {
        let engine = CollaborationEngine::in_memory();
        let g = GraphId::from("g");
        let base = engine.current_graph(&g).await.unwrap();

        let err = engine
            .apply(&g, &op(OperationKind::AddNode(Node::new("x", "X")), base.version + 1))
            .await
            .unwrap_err();

        assert!(matches!(err, CollabError::VersionConflict { current: 1, submitted: 2, .. }));
        assert_eq!(engine.store().version_count(&g).await.unwrap(), 1);
        assert!(engine.active_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_integrity_failure_leaves_latest_unchanged() {
        let engine = CollaborationEngine::in_memory();
        let g = GraphId::from("g");
        let base = engine.current_graph(&g).await.unwrap();
        let v2 = engine
            .apply(&g, &op(OperationKind::AddNode(Node::new("a", "A")), base.version))
            .await
            .unwrap();

        let err = engine
            .apply(&g, &op(OperationKind::AddEdge(Edge::new("e", "a", "missing")), v2.version))
            .await
            .unwrap_err();

        assert!(matches!(err, CollabError::ReferentialIntegrity(_)));
        assert_eq!(engine.current_graph(&g).await.unwrap().version, v2.version);
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let engine = CollaborationEngine::in_memory();
        let g = GraphId::from("g");
        let v1 = engine.current_graph(&g).await.unwrap();
        let v2 = engine
            .apply(&g, &op(OperationKind::AddNode(Node::new("a", "A").with_trust(0.5)), v1.version))
            .await
            .unwrap();
        let v3 = engine
            .apply(&g, &op(OperationKind::UpdateNode(NodePatch::new("a").ambiguous(true)), v2.version))
            .await
            .unwrap();

        let node = v3.node("a").unwrap();
        assert_eq!(node.label, "A");
        assert_eq!(node.trust, 0.5);
        assert!(node.ambiguous);
        assert_eq!(v3.quality.ambiguous_nodes, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_update_edge_to_missing_node_rejected() {
        let engine = CollaborationEngine::in_memory();
        let g = GraphId::from("g");
        let ops = vec![
            op(OperationKind::AddNode(Node::new("a", "A")), 1),
            op(OperationKind::AddNode(Node::new("b", "B")), 2),
            op(OperationKind::AddEdge(Edge::new("e", "a", "b")), 3),
        ];
        engine.current_graph(&g).await.unwrap();
        let v2 = engine.bulk_apply(&g, &ops).await.unwrap();

        let err = engine
            .apply(&g, &op(OperationKind::UpdateEdge(EdgePatch::new("e").source("ghost")), v2.version))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CollabError::ReferentialIntegrity(IntegrityViolation::MissingEndpoint { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_payload_rejected_before_read() {
        let engine = CollaborationEngine::in_memory();
        let g = GraphId::from("g");

        let err = engine
            .apply(&g, &op(OperationKind::AddNode(Node::new("", "empty")), 1))
            .await
            .unwrap_err();

        assert!(matches!(err, CollabError::InvalidPayload(_)));
        assert!(engine.store().latest(&g).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rename_graph_commits_unchanged_content() {
        let engine = CollaborationEngine::in_memory();
        let g = GraphId::from("g");
        let v1 = engine.current_graph(&g).await.unwrap();

        let v2 = engine
            .apply(
                &g,
                &op(OperationKind::RenameGraph(GraphRename { name: "Renamed".into() }), v1.version),
            )
            .await
            .unwrap();

        assert_eq!(v2.version, 2);
        assert_eq!(v2.content_hash, v1.content_hash);
    }

    #[tokio::test]
    async fn test_failed_auto_prune_still_reports_commit() {
        let engine = CollaborationEngine::new(Arc::new(UnprunableStore::default()))
            .with_config(EngineConfig::default().with_keep_last(2));
        let g = GraphId::from("g");
        let v1 = engine.current_graph(&g).await.unwrap();

        let v2 = engine
            .apply(&g, &op(OperationKind::AddNode(Node::new("a", "A")), v1.version))
            .await
            .unwrap();
        assert_eq!(v2.version, 2);
        assert_eq!(engine.active_sessions()[0].version, 2);

        let batch = vec![
            op(OperationKind::AddNode(Node::new("b", "B")), v2.version),
            op(OperationKind::AddNode(Node::new("c", "C")), v2.version + 1),
        ];
        let v3 = engine.bulk_apply(&g, &batch).await.unwrap();
        assert_eq!(v3.version, 3);
        assert_eq!(engine.current_graph(&g).await.unwrap().version, 3);
        assert_eq!(engine.store().version_count(&g).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_keep_last_prunes_after_commit() {
        let engine = CollaborationEngine::in_memory()
            .with_config(EngineConfig::default().with_keep_last(2));
        let g = GraphId::from("g");

        let mut version = engine.current_graph(&g).await.unwrap().version;
        for i in 0..4 {
            let kind = OperationKind::AddNode(Node::new(format!("n{}", i), "x"));
            version = engine.apply(&g, &op(kind, version)).await.unwrap().version;
        }

        let history = engine.history(&g, None).await.unwrap();
        let versions: Vec<_> = history.iter().map(|v| v.version).collect();
        assert_eq!(versions, vec![5, 4]);
        assert!(engine.version(&g, 1).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_apply_records_session() {
        let engine = CollaborationEngine::in_memory();
        let g = GraphId::from("g");
        let v1 = engine.current_graph(&g).await.unwrap();

        let v2 = engine
            .apply(&g, &op(OperationKind::RemoveEdge(ElementRef::new("none")), v1.version))
            .await
            .unwrap();

        let sessions = engine.active_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, SessionId::from("s1"));
        assert_eq!(sessions[0].version, v2.version);

        assert!(engine.end_session(&SessionId::from("s1")).is_some());
        assert!(engine.active_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_bootstrap_after_full_prune_continues_numbering() {
        let engine = CollaborationEngine::in_memory();
        let g = GraphId::from("g");
        let v1 = engine.current_graph(&g).await.unwrap();
        engine
            .apply(&g, &op(OperationKind::AddNode(Node::new("a", "A")), v1.version))
            .await
            .unwrap();

        engine.prune(&g, 0).await.unwrap();
        let rebooted = engine.current_graph(&g).await.unwrap();

        assert_eq!(rebooted.version, 3);
        assert!(rebooted.nodes.is_empty());
    }

    #[test]
    fn test_store_conflict_maps_to_version_conflict() {
        let err: CollabError = StoreError::VersionConflict {
            graph_id: GraphId::from("g"),
            expected: 3,
            actual: 4,
        }
        .into();
        assert!(matches!(err, CollabError::VersionConflict { current: 4, submitted: 3, .. }));
    }

    #[test]
    fn test_payload_errors_map_to_kinds() {
        let err: CollabError = PayloadError::Unsupported("merge".into()).into();
        assert!(matches!(err, CollabError::UnsupportedOperation(ref t) if t == "merge"));
    }
}
