//! In-memory snapshot store.
//!
//! Each graph owns its own lock, so saves to different graphs never contend.
//! Snapshots are stored behind `Arc` and published with a single map insert,
//! so readers either see a whole version or none of it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::types::{now_utc, Edge, GraphId, GraphVersion, Node, QualityReport, SessionId};
use super::{prepare_snapshot, SnapshotStore, StoreError};

#[derive(Debug)]
struct GraphHistory {
    registered_at: DateTime<Utc>,
    /// Highest version ever allocated; survives pruning.
    head: u64,
    versions: BTreeMap<u64, Arc<GraphVersion>>,
}

impl GraphHistory {
    fn new() -> Self {
        Self {
            registered_at: now_utc(),
            head: 0,
            versions: BTreeMap::new(),
        }
    }
}

/// In-memory snapshot store for tests, tools and single-process use.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    graphs: RwLock<BTreeMap<GraphId, Arc<RwLock<GraphHistory>>>>,
    closed: AtomicBool,
}

impl InMemorySnapshotStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// When a graph was first registered.
    pub fn registered_at(&self, graph_id: &GraphId) -> Option<DateTime<Utc>> {
        self.graphs
            .read()
            .get(graph_id)
            .map(|history| history.read().registered_at)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            tracing::warn!("Access to closed in-memory snapshot store");
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn history_of(&self, graph_id: &GraphId) -> Option<Arc<RwLock<GraphHistory>>> {
        self.graphs.read().get(graph_id).cloned()
    }

    fn history_or_register(&self, graph_id: &GraphId) -> Arc<RwLock<GraphHistory>> {
        if let Some(history) = self.history_of(graph_id) {
            return history;
        }
        self.graphs
            .write()
            .entry(graph_id.clone())
            .or_insert_with(|| Arc::new(RwLock::new(GraphHistory::new())))
            .clone()
    }

    fn commit(
        &self,
        graph_id: &GraphId,
        expected_latest: Option<u64>,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        author_session: Option<SessionId>,
        quality: QualityReport,
    ) -> Result<GraphVersion, StoreError> {
        self.ensure_open()?;
        let (nodes, edges) = prepare_snapshot(graph_id, nodes, edges)?;
        let history = self.history_or_register(graph_id);

        let mut history = history.write();
        if let Some(expected) = expected_latest {
            if history.head != expected {
                return Err(StoreError::VersionConflict {
                    graph_id: graph_id.clone(),
                    expected,
                    actual: history.head,
                });
            }
        }

        let version = GraphVersion::new(
            graph_id.clone(),
            history.head + 1,
            nodes,
            edges,
            now_utc(),
            author_session,
            quality,
        )?;

        history.head = version.version;
        history.versions.insert(version.version, Arc::new(version.clone()));

        tracing::debug!(
            graph_id = %graph_id,
            version = version.version,
            nodes = version.nodes.len(),
            edges = version.edges.len(),
            "Saved graph version"
        );

        Ok(version)
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn register_graph(&self, graph_id: &GraphId) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.history_or_register(graph_id);
        Ok(())
    }

    async fn latest(&self, graph_id: &GraphId) -> Result<Option<GraphVersion>, StoreError> {
        self.ensure_open()?;
        Ok(self.history_of(graph_id).and_then(|history| {
            history
                .read()
                .versions
                .values()
                .next_back()
                .map(|v| GraphVersion::clone(v))
        }))
    }

    async fn load(&self, graph_id: &GraphId, version: u64) -> Result<GraphVersion, StoreError> {
        self.ensure_open()?;
        self.history_of(graph_id)
            .and_then(|history| {
                history
                    .read()
                    .versions
                    .get(&version)
                    .map(|v| GraphVersion::clone(v))
            })
            .ok_or_else(|| StoreError::NotFound {
                graph_id: graph_id.clone(),
                version,
            })
    }

    async fn save(
        &self,
        graph_id: &GraphId,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        author_session: Option<SessionId>,
        quality: QualityReport,
    ) -> Result<GraphVersion, StoreError> {
        self.commit(graph_id, None, nodes, edges, author_session, quality)
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
        self.commit(graph_id, Some(expected_latest), nodes, edges, author_session, quality)
    }

    async fn history(
        &self,
        graph_id: &GraphId,
        limit: Option<usize>,
    ) -> Result<Vec<GraphVersion>, StoreError> {
        self.ensure_open()?;
        let Some(history) = self.history_of(graph_id) else {
            return Ok(Vec::new());
        };
        let history = history.read();
        Ok(history
            .versions
            .values()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .map(|v| GraphVersion::clone(v))
            .collect())
    }

    async fn prune(&self, graph_id: &GraphId, keep_last: usize) -> Result<usize, StoreError> {
        self.ensure_open()?;
        let Some(history) = self.history_of(graph_id) else {
            return Ok(0);
        };
        let mut history = history.write();

        let stale: Vec<u64> = history
            .versions
            .keys()
            .rev()
            .skip(keep_last)
            .copied()
            .collect();
        for version in &stale {
            history.versions.remove(version);
        }

        tracing::debug!(
            graph_id = %graph_id,
            keep_last,
            removed = stale.len(),
            "Pruned graph history"
        );

        Ok(stale.len())
    }

    async fn graph_ids(&self) -> Result<Vec<GraphId>, StoreError> {
        self.ensure_open()?;
        Ok(self.graphs.read().keys().cloned().collect())
    }

    async fn version_count(&self, graph_id: &GraphId) -> Result<usize, StoreError> {
        self.ensure_open()?;
        Ok(self
            .history_of(graph_id)
            .map(|history| history.read().versions.len())
            .unwrap_or(0))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.graphs.write().clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gid(s: &str) -> GraphId {
        GraphId::from(s)
    }

    async fn save_plain(store: &InMemorySnapshotStore, graph: &str, nodes: Vec<Node>) -> GraphVersion {
        store
            .save(&gid(graph), nodes, vec![], Some(SessionId::from("s")), QualityReport::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_save_and_history() {
        let store = InMemorySnapshotStore::new();
        let mut nodes = vec![Node::new("n1", "Root"), Node::new("n2", "Child")];
        let edges = vec![Edge::new("e1", "n1", "n2").with_label("connects")];

        let v1 = store
            .save(&gid("graph"), nodes.clone(), edges.clone(), Some("s1".into()), QualityReport::default())
            .await
            .unwrap();
        assert_eq!(v1.version, 1);

        nodes.push(Node::new("n3", "Another"));
        let v2 = store
            .save(&gid("graph"), nodes, edges, Some("s2".into()), QualityReport::default())
            .await
            .unwrap();
        assert_eq!(v2.version, 2);

        let history = store.history(&gid("graph"), None).await.unwrap();
        let versions: Vec<_> = history.iter().map(|v| v.version).collect();
        assert_eq!(versions, vec![2, 1]);

        let latest = store.latest(&gid("graph")).await.unwrap().unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.nodes.len(), 3);
        assert_eq!(latest.author_session, Some(SessionId::from("s2")));
    }

    #[tokio::test]
    async fn test_latest_of_unknown_graph_is_none() {
        let store = InMemorySnapshotStore::new();
        assert!(store.latest(&gid("nope")).await.unwrap().is_none());
        assert!(store.history(&gid("nope"), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_missing_version_is_not_found() {
        let store = InMemorySnapshotStore::new();
        save_plain(&store, "g", vec![]).await;

        let err = store.load(&gid("g"), 7).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_prune_keeps_newest() {
        let store = InMemorySnapshotStore::new();
        let nodes: Vec<_> = (0..3).map(|i| Node::new(format!("n{}", i), i.to_string())).collect();
        for _ in 0..6 {
            save_plain(&store, "g", nodes.clone()).await;
        }
        save_plain(&store, "other", vec![]).await;

        let removed = store.prune(&gid("g"), 3).await.unwrap();
        assert_eq!(removed, 3);

        let versions: Vec<_> = store
            .history(&gid("g"), None)
            .await
            .unwrap()
            .iter()
            .map(|v| v.version)
            .collect();
        assert_eq!(versions, vec![6, 5, 4]);
        assert!(store.load(&gid("g"), 2).await.unwrap_err().is_not_found());
        assert_eq!(store.version_count(&gid("other")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_versions_continue_after_full_prune() {
        let store = InMemorySnapshotStore::new();
        save_plain(&store, "g", vec![]).await;
        save_plain(&store, "g", vec![]).await;

        store.prune(&gid("g"), 0).await.unwrap();
        assert!(store.latest(&gid("g")).await.unwrap().is_none());

        let next = save_plain(&store, "g", vec![]).await;
        assert_eq!(next.version, 3);
    }

    #[tokio::test]
    async fn test_conditional_save_detects_conflict() {
        let store = InMemorySnapshotStore::new();
        save_plain(&store, "g", vec![]).await;

        let err = store
            .save_if_latest(&gid("g"), 0, vec![], vec![], None, QualityReport::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { expected: 0, actual: 1, .. }));
        assert_eq!(store.version_count(&gid("g")).await.unwrap(), 1);

        let ok = store
            .save_if_latest(&gid("g"), 1, vec![], vec![], None, QualityReport::default())
            .await
            .unwrap();
        assert_eq!(ok.version, 2);
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected() {
        let store = InMemorySnapshotStore::new();
        let err = store
            .save(
                &gid("g"),
                vec![Node::new("a", "A"), Node::new("a", "again")],
                vec![],
                None,
                QualityReport::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId { kind: "node", .. }));
        assert_eq!(store.version_count(&gid("g")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_saved_nodes_sorted_by_id() {
        let store = InMemorySnapshotStore::new();
        let saved = save_plain(&store, "g", vec![Node::new("b", "B"), Node::new("a", "A")]).await;
        let ids: Vec<_> = saved.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(saved.verify_content_hash());
    }

    #[tokio::test]
    async fn test_register_graph_is_idempotent() {
        let store = InMemorySnapshotStore::new();
        store.register_graph(&gid("g")).await.unwrap();
        let first = store.registered_at(&gid("g")).unwrap();
        store.register_graph(&gid("g")).await.unwrap();

        assert_eq!(store.registered_at(&gid("g")).unwrap(), first);
        assert_eq!(store.graph_ids().await.unwrap(), vec![gid("g")]);
        assert!(store.latest(&gid("g")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_rejects_use() {
        let store = InMemorySnapshotStore::new();
        save_plain(&store, "g", vec![]).await;

        store.close().await;
        store.close().await;

        assert!(matches!(store.latest(&gid("g")).await, Err(StoreError::Closed)));
    }
}
