//! Quality report types.

use serde::{Deserialize, Serialize};

/// Count, min, max and average over all node trust values.
///
/// All statistics are `0.0` when there are no nodes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TrustSummary {
    /// Number of nodes.
    pub count: usize,
    /// Lowest trust value.
    pub min: f64,
    /// Highest trust value.
    pub max: f64,
    /// Mean trust value.
    pub avg: f64,
}

impl TrustSummary {
    /// Summarize a sequence of trust values.
    pub fn from_values<I: IntoIterator<Item = f64>>(values: I) -> Self {
        let mut count = 0usize;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;

        for value in values {
            count += 1;
            min = min.min(value);
            max = max.max(value);
            sum += value;
        }

        if count == 0 {
            return Self::default();
        }

        Self {
            count,
            min,
            max,
            avg: sum / count as f64,
        }
    }
}

/// Structural anomalies found in one snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QualityReport {
    /// Ids of nodes flagged ambiguous, sorted.
    pub ambiguous_nodes: Vec<String>,
    /// Ids of nodes with no incident edge in either direction, sorted.
    pub isolated_nodes: Vec<String>,
    /// Closed walks, each ending with its starting node id.
    pub cycles: Vec<Vec<String>>,
    /// Trust statistics.
    pub trust_summary: TrustSummary,
}

impl QualityReport {
    /// Whether any cycle was found.
    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }

    /// Whether the report flags nothing.
    pub fn is_clean(&self) -> bool {
        self.ambiguous_nodes.is_empty() && self.isolated_nodes.is_empty() && self.cycles.is_empty()
    }
}
