//! Versioned graph snapshots.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::snapshot_fingerprint;
use super::edge::Edge;
use super::graph::{GraphId, SessionId};
use super::node::Node;
use super::quality::QualityReport;

/// ISO-8601 UTC timestamps with a trailing `Z`.
///
/// Whole seconds are written without a fraction, anything else with six
/// fractional digits. Stores truncate creation times to microseconds (see
/// [`now_utc`]), so a persisted timestamp formats back to the exact same
/// string. Offsets other than `Z` are rejected.
pub mod timestamp {
    use chrono::{DateTime, SecondsFormat, Timelike, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Timestamp that is not an RFC 3339 UTC instant.
    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    pub enum TimestampError {
        /// Not RFC 3339 at all.
        #[error("invalid timestamp: {0}")]
        Parse(#[from] chrono::ParseError),
        /// Carries an explicit offset instead of `Z`.
        #[error("timestamp {0} must be UTC with a trailing Z")]
        NotUtc(String),
    }

    /// Format a timestamp, e.g. `2024-05-01T12:30:00Z` or
    /// `2024-05-01T12:30:00.123456Z`.
    pub fn format(ts: &DateTime<Utc>) -> String {
        let precision = if ts.nanosecond() == 0 {
            SecondsFormat::Secs
        } else {
            SecondsFormat::Micros
        };
        ts.to_rfc3339_opts(precision, true)
    }

    /// Parse an RFC 3339 timestamp ending in `Z`.
    pub fn parse(s: &str) -> Result<DateTime<Utc>, TimestampError> {
        if !s.ends_with('Z') {
            return Err(TimestampError::NotUtc(s.to_string()));
        }
        Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
    }

    /// Serde serializer.
    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(ts))
    }

    /// Serde deserializer.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Current time truncated to the precision stores persist.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// A complete, immutable snapshot of one graph at one version.
///
/// Created only by a snapshot store. `quality` is always the analyzer's
/// output over exactly `nodes` and `edges`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphVersion {
    /// Graph this snapshot belongs to.
    pub graph_id: GraphId,
    /// Version number, starting at 1 and increasing by exactly 1.
    pub version: u64,
    /// Nodes sorted by id.
    pub nodes: Vec<Node>,
    /// Edges sorted by id.
    pub edges: Vec<Edge>,
    /// Persistence time.
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    /// Session whose operation produced this version. `None` for bootstrap.
    pub author_session: Option<SessionId>,
    /// Quality report for this node/edge set.
    pub quality: QualityReport,
    /// xxh64 fingerprint of `nodes` and `edges`.
    #[serde(default)]
    pub content_hash: String,
}

impl GraphVersion {
    /// Assemble a snapshot and compute its content fingerprint.
    pub fn new(
        graph_id: GraphId,
        version: u64,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        created_at: DateTime<Utc>,
        author_session: Option<SessionId>,
        quality: QualityReport,
    ) -> Result<Self, serde_json::Error> {
        let content_hash = snapshot_fingerprint(&nodes, &edges)?;
        Ok(Self {
            graph_id,
            version,
            nodes,
            edges,
            created_at,
            author_session,
            quality,
            content_hash,
        })
    }

    /// Recompute the fingerprint and compare it with the stored one.
    pub fn verify_content_hash(&self) -> bool {
        snapshot_fingerprint(&self.nodes, &self.edges)
            .map(|hash| hash == self.content_hash)
            .unwrap_or(false)
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Look up an edge by id.
    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id == id)
    }

    /// Serialize to the exporter record.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse an exporter record.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
