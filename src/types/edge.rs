//! Edge value type.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_weight() -> f64 {
    1.0
}

/// A directed connection between two nodes of the same version.
///
/// `source` and `target` are checked against the node set when the edge is
/// added; the value itself carries no such guarantee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Edge {
    /// Unique key within a graph version.
    pub id: String,
    /// Source node id.
    pub source: String,
    /// Target node id.
    pub target: String,
    /// Optional display text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Edge weight.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl Edge {
    /// Create an unlabeled edge with weight 1.0.
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            label: None,
            weight: default_weight(),
        }
    }

    /// Set the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the weight.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Whether either endpoint is `node_id`.
    pub fn touches(&self, node_id: &str) -> bool {
        self.source == node_id || self.target == node_id
    }

    /// Whether source and target are the same node.
    pub fn is_self_loop(&self) -> bool {
        self.source == self.target
    }
}

/// Index edges by id. Later duplicates replace earlier ones.
pub fn index_edges<'a, I>(edges: I) -> BTreeMap<String, Edge>
where
    I: IntoIterator<Item = &'a Edge>,
{
    edges
        .into_iter()
        .map(|edge| (edge.id.clone(), edge.clone()))
        .collect()
}
