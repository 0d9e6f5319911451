//! Client operations against a shared graph.
//!
//! On the wire an operation is an envelope
//! `{"type": "...", "payload": {...}, "session_id": "...", "version": N}`.
//! In Rust each kind is a variant with its own typed payload, and the
//! `update_*` kinds take a patch listing only the fields that may change.

use serde::{Deserialize, Serialize};

use super::edge::Edge;
use super::graph::SessionId;
use super::node::Node;

/// Fields of a node that an update may change. `None` leaves a field as is.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodePatch {
    /// Id of the node to update.
    pub id: String,
    /// New label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// New trust value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust: Option<f64>,
    /// New ambiguity flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ambiguous: Option<bool>,
}

impl NodePatch {
    /// Patch targeting `id` that changes nothing yet.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Change the label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Change the trust value.
    pub fn trust(mut self, trust: f64) -> Self {
        self.trust = Some(trust);
        self
    }

    /// Change the ambiguity flag.
    pub fn ambiguous(mut self, ambiguous: bool) -> Self {
        self.ambiguous = Some(ambiguous);
        self
    }

    /// Produce the updated node.
    pub fn merge(&self, existing: &Node) -> Node {
        Node {
            id: existing.id.clone(),
            label: self.label.clone().unwrap_or_else(|| existing.label.clone()),
            trust: self.trust.unwrap_or(existing.trust),
            ambiguous: self.ambiguous.unwrap_or(existing.ambiguous),
        }
    }
}

/// Fields of an edge that an update may change. `None` leaves a field as is.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EdgePatch {
    /// Id of the edge to update.
    pub id: String,
    /// New source node id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// New target node id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// New label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// New weight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

impl EdgePatch {
    /// Patch targeting `id` that changes nothing yet.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Change the source endpoint.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Change the target endpoint.
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Change the label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Change the weight.
    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Produce the updated edge.
    pub fn merge(&self, existing: &Edge) -> Edge {
        Edge {
            id: existing.id.clone(),
            source: self.source.clone().unwrap_or_else(|| existing.source.clone()),
            target: self.target.clone().unwrap_or_else(|| existing.target.clone()),
            label: self.label.clone().or_else(|| existing.label.clone()),
            weight: self.weight.unwrap_or(existing.weight),
        }
    }
}

/// Payload of the remove kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElementRef {
    /// Id of the node or edge.
    pub id: String,
}

impl ElementRef {
    /// Reference an element by id.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Payload of `rename_graph`. Carried through but not applied to graph data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphRename {
    /// New display name.
    pub name: String,
}

/// The structural edit an operation performs.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationKind {
    /// Insert or replace a node.
    AddNode(Node),
    /// Merge fields onto an existing node.
    UpdateNode(NodePatch),
    /// Delete a node and every edge touching it.
    RemoveNode(ElementRef),
    /// Insert an edge between existing nodes.
    AddEdge(Edge),
    /// Merge fields onto an existing edge.
    UpdateEdge(EdgePatch),
    /// Delete an edge.
    RemoveEdge(ElementRef),
    /// Rename the graph (metadata only).
    RenameGraph(GraphRename),
}

impl OperationKind {
    /// Every wire tag this crate understands.
    pub const TYPE_NAMES: [&'static str; 7] = [
        "add_node",
        "update_node",
        "remove_node",
        "add_edge",
        "update_edge",
        "remove_edge",
        "rename_graph",
    ];

    /// The wire tag of this kind.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::AddNode(_) => "add_node",
            Self::UpdateNode(_) => "update_node",
            Self::RemoveNode(_) => "remove_node",
            Self::AddEdge(_) => "add_edge",
            Self::UpdateEdge(_) => "update_edge",
            Self::RemoveEdge(_) => "remove_edge",
            Self::RenameGraph(_) => "rename_graph",
        }
    }

    /// Id of the node or edge this kind targets, if any.
    pub fn element_id(&self) -> Option<&str> {
        match self {
            Self::AddNode(node) => Some(&node.id),
            Self::UpdateNode(patch) => Some(&patch.id),
            Self::RemoveNode(r) | Self::RemoveEdge(r) => Some(&r.id),
            Self::AddEdge(edge) => Some(&edge.id),
            Self::UpdateEdge(patch) => Some(&patch.id),
            Self::RenameGraph(_) => None,
        }
    }

    /// Check the payload against its kind's schema.
    ///
    /// Ids must be non-empty; trust and weight must be finite.
    pub fn validate(&self) -> Result<(), PayloadError> {
        let invalid = |message: &str| PayloadError::Invalid {
            op_type: self.type_name().to_string(),
            message: message.to_string(),
        };

        if let Some(id) = self.element_id() {
            if id.is_empty() {
                return Err(invalid("id must not be empty"));
            }
        }

        match self {
            Self::AddNode(node) if !node.trust.is_finite() => Err(invalid("trust must be finite")),
            Self::UpdateNode(NodePatch { trust: Some(t), .. }) if !t.is_finite() => {
                Err(invalid("trust must be finite"))
            }
            Self::AddEdge(edge) if !edge.weight.is_finite() => Err(invalid("weight must be finite")),
            Self::AddEdge(edge) if edge.source.is_empty() || edge.target.is_empty() => {
                Err(invalid("edge endpoints must not be empty"))
            }
            Self::UpdateEdge(EdgePatch { weight: Some(w), .. }) if !w.is_finite() => {
                Err(invalid("weight must be finite"))
            }
            _ => Ok(()),
        }
    }

    fn from_parts(op_type: &str, payload: serde_json::Value) -> Result<Self, PayloadError> {
        fn typed<T: serde::de::DeserializeOwned>(
            op_type: &str,
            payload: serde_json::Value,
        ) -> Result<T, PayloadError> {
            serde_json::from_value(payload).map_err(|e| PayloadError::Invalid {
                op_type: op_type.to_string(),
                message: e.to_string(),
            })
        }

        let kind = match op_type {
            "add_node" => Self::AddNode(typed(op_type, payload)?),
            "update_node" => Self::UpdateNode(typed(op_type, payload)?),
            "remove_node" => Self::RemoveNode(typed(op_type, payload)?),
            "add_edge" => Self::AddEdge(typed(op_type, payload)?),
            "update_edge" => Self::UpdateEdge(typed(op_type, payload)?),
            "remove_edge" => Self::RemoveEdge(typed(op_type, payload)?),
            "rename_graph" => Self::RenameGraph(typed(op_type, payload)?),
            other => return Err(PayloadError::Unsupported(other.to_string())),
        };
        kind.validate()?;
        Ok(kind)
    }

    fn payload_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::AddNode(node) => serde_json::to_value(node),
            Self::UpdateNode(patch) => serde_json::to_value(patch),
            Self::RemoveNode(r) | Self::RemoveEdge(r) => serde_json::to_value(r),
            Self::AddEdge(edge) => serde_json::to_value(edge),
            Self::UpdateEdge(patch) => serde_json::to_value(patch),
            Self::RenameGraph(rename) => serde_json::to_value(rename),
        }
    }
}

/// Error decoding or validating an operation payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    /// Unknown operation type tag.
    #[error("Unsupported operation type: {0}")]
    Unsupported(String),
    /// Payload does not match the kind's schema.
    #[error("Invalid {op_type} payload: {message}")]
    Invalid {
        /// Wire tag of the operation.
        op_type: String,
        /// What was wrong.
        message: String,
    },
}

/// Wire form of an operation: `{type, payload, session_id, version}`.
///
/// Only used as the serde representation of [`GraphOperation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationEnvelope {
    #[serde(rename = "type")]
    op_type: String,
    payload: serde_json::Value,
    session_id: SessionId,
    version: u64,
}

/// A single edit submitted by a client, computed against base `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "OperationEnvelope", into = "OperationEnvelope")]
pub struct GraphOperation {
    /// The edit.
    pub kind: OperationKind,
    /// Submitting session.
    pub session_id: SessionId,
    /// Version of the snapshot the edit was computed against.
    pub version: u64,
}

impl GraphOperation {
    /// Create an operation.
    pub fn new(kind: OperationKind, session_id: impl Into<SessionId>, version: u64) -> Self {
        Self {
            kind,
            session_id: session_id.into(),
            version,
        }
    }

    /// Parse the wire envelope from a JSON string.
    pub fn from_json(s: &str) -> Result<Self, PayloadError> {
        let envelope: OperationEnvelope =
            serde_json::from_str(s).map_err(|e| PayloadError::Invalid {
                op_type: "envelope".to_string(),
                message: e.to_string(),
            })?;
        Self::try_from(envelope)
    }

    /// Parse the wire envelope from a JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, PayloadError> {
        let envelope: OperationEnvelope =
            serde_json::from_value(value).map_err(|e| PayloadError::Invalid {
                op_type: "envelope".to_string(),
                message: e.to_string(),
            })?;
        Self::try_from(envelope)
    }
}

impl TryFrom<OperationEnvelope> for GraphOperation {
    type Error = PayloadError;

    fn try_from(envelope: OperationEnvelope) -> Result<Self, Self::Error> {
        let kind = OperationKind::from_parts(&envelope.op_type, envelope.payload)?;
        Ok(Self {
            kind,
            session_id: envelope.session_id,
            version: envelope.version,
        })
    }
}

impl From<GraphOperation> for OperationEnvelope {
    fn from(op: GraphOperation) -> Self {
        // Payload types are plain structs of strings, floats and bools.
        let payload = op.kind.payload_value().unwrap_or(serde_json::Value::Null);
        Self {
            op_type: op.kind.type_name().to_string(),
            payload,
            session_id: op.session_id,
            version: op.version,
        }
    }
}
