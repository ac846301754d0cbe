//! Travel-time lookups between a route's origin and destination.
//!
//! [`TravelTimeLookup`] is the seam the scheduling cycle calls. It never
//! fails loudly: quota and availability problems are retried inside the
//! implementation and collapse to `None` once retries run out.

mod directions;

pub use directions::{DIRECTIONS_URL, DirectionsClient, RetryPolicy, parse_directions};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One observed origin-to-destination travel time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelTime {
    pub distance_m: u64,
    pub duration_s: u64,
    /// Falls back to `duration_s` when the provider has no traffic estimate.
    pub duration_in_traffic_s: u64,
}

/// Why a single lookup attempt did not produce a [`TravelTime`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupFailure {
    /// Transient; the caller backs off and retries.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("lookup unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait TravelTimeLookup: Send + Sync {
    /// Returns `None` when the provider could not answer within the retry budget.
    async fn lookup(&self, origin: &str, destination: &str) -> Option<TravelTime>;
}
