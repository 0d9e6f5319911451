//! Core types: graph elements, snapshots, quality reports and operations.

pub mod graph;
pub mod node;
pub mod edge;
pub mod quality;
pub mod version;
pub mod operation;

pub use graph::{GraphId, SessionId};
pub use node::{Node, index_nodes};
pub use edge::{Edge, index_edges};
pub use quality::{QualityReport, TrustSummary};
pub use version::{GraphVersion, now_utc};
pub use operation::{
    GraphOperation, OperationKind, OperationEnvelope, NodePatch, EdgePatch,
    ElementRef, GraphRename, PayloadError,
};
