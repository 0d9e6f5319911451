//! Registry of collaborating sessions and the version each last saw.
//!
//! Writers are serialized by one lock, so concurrent upserts for different
//! sessions never interfere. Updates to the same session are last-write-wins.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::version::timestamp;
use crate::types::{now_utc, GraphId, SessionId};

/// Last known position of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// The session.
    pub session_id: SessionId,
    /// Graph the session last wrote to.
    pub graph_id: GraphId,
    /// Version its last write produced.
    pub version: u64,
    /// When the record was last written.
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

/// Shared registry of active sessions. No expiry.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<BTreeMap<SessionId, SessionRecord>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the graph and version a session last produced.
    pub fn upsert(&self, session_id: &SessionId, graph_id: &GraphId, version: u64) -> SessionRecord {
        let record = SessionRecord {
            session_id: session_id.clone(),
            graph_id: graph_id.clone(),
            version,
            updated_at: now_utc(),
        };
        self.sessions.write().insert(session_id.clone(), record.clone());
        record
    }

    /// Forget a session. Returns its last record, if any.
    pub fn remove(&self, session_id: &SessionId) -> Option<SessionRecord> {
        self.sessions.write().remove(session_id)
    }

    /// Last record of a session.
    pub fn get(&self, session_id: &SessionId) -> Option<SessionRecord> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Snapshot of every record, ordered by session id.
    pub fn all(&self) -> Vec<SessionRecord> {
        self.sessions.read().values().cloned().collect()
    }

    /// Records of sessions whose last write was to `graph_id`.
    pub fn on_graph(&self, graph_id: &GraphId) -> Vec<SessionRecord> {
        self.sessions
            .read()
            .values()
            .filter(|record| &record.graph_id == graph_id)
            .cloned()
            .collect()
    }

    /// Number of tracked sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no sessions are tracked.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Drop every record.
    pub fn clear(&self) {
        self.sessions.write().clear();
    }
}
