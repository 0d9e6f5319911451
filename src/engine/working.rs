//! Mutable working copy of a snapshot that operations are applied to.

use std::collections::BTreeMap;

use crate::types::{index_edges, index_nodes, Edge, GraphVersion, Node, OperationKind};

/// An operation would leave an edge pointing at a missing node, or targets
/// an element that does not exist.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityViolation {
    /// Edge endpoint names a node absent from the snapshot.
    #[error("edge {edge_id} references missing node {node_id}")]
    MissingEndpoint {
        /// Edge being added or updated.
        edge_id: String,
        /// The missing node id.
        node_id: String,
    },
    /// Update targets a node that does not exist.
    #[error("node {0} does not exist")]
    MissingNode(String),
    /// Update targets an edge that does not exist.
    #[error("edge {0} does not exist")]
    MissingEdge(String),
}

/// Nodes and edges keyed by id. Iteration order is id order.
#[derive(Debug, Clone, Default)]
pub(crate) struct WorkingGraph {
    nodes: BTreeMap<String, Node>,
    edges: BTreeMap<String, Edge>,
}

impl WorkingGraph {
    pub(crate) fn from_version(version: &GraphVersion) -> Self {
        Self {
            nodes: index_nodes(&version.nodes),
            edges: index_edges(&version.edges),
        }
    }

    /// Apply one edit. On error the working state is unchanged.
    pub(crate) fn apply(&mut self, kind: &OperationKind) -> Result<(), IntegrityViolation> {
        match kind {
            OperationKind::AddNode(node) => {
                self.nodes.insert(node.id.clone(), node.clone());
            }
            OperationKind::UpdateNode(patch) => {
                let existing = self
                    .nodes
                    .get(&patch.id)
                    .ok_or_else(|| IntegrityViolation::MissingNode(patch.id.clone()))?;
                let updated = patch.merge(existing);
                self.nodes.insert(updated.id.clone(), updated);
            }
            OperationKind::RemoveNode(target) => {
                self.nodes.remove(&target.id);
                self.edges.retain(|_, edge| !edge.touches(&target.id));
            }
            OperationKind::AddEdge(edge) => {
                self.check_endpoints(edge)?;
                self.edges.insert(edge.id.clone(), edge.clone());
            }
            OperationKind::UpdateEdge(patch) => {
                let existing = self
                    .edges
                    .get(&patch.id)
                    .ok_or_else(|| IntegrityViolation::MissingEdge(patch.id.clone()))?;
                let updated = patch.merge(existing);
                self.check_endpoints(&updated)?;
                self.edges.insert(updated.id.clone(), updated);
            }
            OperationKind::RemoveEdge(target) => {
                self.edges.remove(&target.id);
            }
            // Graph names live outside the snapshot.
            OperationKind::RenameGraph(_) => {}
        }
        Ok(())
    }

    fn check_endpoints(&self, edge: &Edge) -> Result<(), IntegrityViolation> {
        for endpoint in [&edge.source, &edge.target] {
            if !self.nodes.contains_key(endpoint) {
                return Err(IntegrityViolation::MissingEndpoint {
                    edge_id: edge.id.clone(),
                    node_id: endpoint.clone(),
                });
            }
        }
        Ok(())
    }

    /// Nodes and edges, each sorted by id.
    pub(crate) fn into_parts(self) -> (Vec<Node>, Vec<Edge>) {
        (self.nodes.into_values().collect(), self.edges.into_values().collect())
    }
}
