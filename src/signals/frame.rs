use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

/// One observed interval for a route after the three sources are merged.
///
/// Counts are held as `f64` for the feature builder but serialize as whole
/// numbers, truncated toward zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SignalRow {
    pub timestamp: DateTime<Utc>,
    /// Boarding count, the primary signal.
    #[serde(rename = "boarding", serialize_with = "whole_count")]
    pub signal: f64,
    #[serde(serialize_with = "whole_count")]
    pub landing: f64,
    #[serde(serialize_with = "whole_count")]
    pub loader: f64,
}

fn whole_count<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_i64(*value as i64)
}

/// Merged, timestamp-sorted history of a single route.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalFrame {
    /// Route the rows belong to. May differ from the requested id when the
    /// loader fell back to the first discovered route.
    pub route_id: String,
    pub rows: Vec<SignalRow>,
}

impl SignalFrame {
    pub fn new(route_id: impl Into<String>, mut rows: Vec<SignalRow>) -> Self {
        rows.sort_by_key(|r| r.timestamp);
        Self {
            route_id: route_id.into(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The most recent `n` rows, oldest first.
    pub fn tail(&self, n: usize) -> &[SignalRow] {
        let start = self.rows.len().saturating_sub(n);
        &self.rows[start..]
    }
}
