//! Node value type.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_trust() -> f64 {
    1.0
}

/// A vertex of a shared graph.
///
/// Immutable value: updates produce a new `Node` with the same `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Node {
    /// Unique key within a graph version.
    pub id: String,
    /// Display text.
    pub label: String,
    /// Caller-supplied confidence.
    #[serde(default = "default_trust")]
    pub trust: f64,
    /// Flagged by its producer as having uncertain identity or meaning.
    #[serde(default)]
    pub ambiguous: bool,
}

impl Node {
    /// Create a node with default trust (1.0) and no ambiguity flag.
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            trust: default_trust(),
            ambiguous: false,
        }
    }

    /// Set the trust value.
    pub fn with_trust(mut self, trust: f64) -> Self {
        self.trust = trust;
        self
    }

    /// Set the ambiguity flag.
    pub fn with_ambiguous(mut self, ambiguous: bool) -> Self {
        self.ambiguous = ambiguous;
        self
    }
}

/// Index nodes by id. Later duplicates replace earlier ones.
pub fn index_nodes<'a, I>(nodes: I) -> BTreeMap<String, Node>
where
    I: IntoIterator<Item = &'a Node>,
{
    nodes
        .into_iter()
        .map(|node| (node.id.clone(), node.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_on_deserialize() {
        let node: Node = serde_json::from_str(r#"{"id":"a","label":"A"}"#).unwrap();
        assert_eq!(node, Node::new("a", "A"));
        assert_eq!(node.trust, 1.0);
        assert!(!node.ambiguous);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<Node, _> =
            serde_json::from_str(r#"{"id":"a","label":"A","colour":"red"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_index_nodes_orders_by_id() {
        let nodes = vec![Node::new("b", "B"), Node::new("a", "A")];
        let index = index_nodes(&nodes);
        let keys: Vec<_> = index.keys().cloned().collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
