//! Rows of the four append-only tables, keyed by `(route_id, timestamp)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observed travel-time sample for a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub route_id: String,
    pub timestamp: DateTime<Utc>,
    pub distance_m: u64,
    pub duration_s: u64,
    pub duration_in_traffic_s: u64,
    pub source: String,
}

/// One forecast minute as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub route_id: String,
    pub timestamp: DateTime<Utc>,
    /// Whole seconds, truncated.
    pub predicted_delay_sec: i64,
    pub model_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub route_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(with = "departure_list")]
    pub departures_minutes: Vec<u32>,
    pub fitness: f64,
}

/// Origin/destination pair an operator assigned to a route. The newest row
/// per route is the route's current mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteMappingRecord {
    pub route_id: String,
    pub timestamp: DateTime<Utc>,
    pub origin: String,
    pub destination: String,
}

/// Row key shared by every table.
pub trait Keyed {
    fn route_id(&self) -> &str;
    fn timestamp(&self) -> DateTime<Utc>;
}

macro_rules! keyed {
    ($($ty:ty),*) => {$(
        impl Keyed for $ty {
            fn route_id(&self) -> &str {
                &self.route_id
            }

            fn timestamp(&self) -> DateTime<Utc> {
                self.timestamp
            }
        }
    )*};
}

keyed!(SnapshotRecord, PredictionRecord, ScheduleRecord, RouteMappingRecord);

/// CSV cells cannot hold sequences, so departures are written space-separated.
mod departure_list {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[u32], serializer: S) -> Result<S::Ok, S::Error> {
        let joined = values
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        serializer.serialize_str(&joined)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u32>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.split_whitespace()
            .map(|v| v.parse::<u32>().map_err(serde::de::Error::custom))
            .collect()
    }
}
