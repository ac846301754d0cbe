//! Append-only persistence for snapshots, predictions, schedules and route
//! mappings.
//!
//! [`Repository`] is the async seam the pipeline writes through.
//! [`CsvRepository`] implements it with one CSV per table and route.
//! Prediction and schedule writes are independent appends; a failure between
//! them leaves the predictions in place.

mod csv_repository;
mod records;

pub use csv_repository::CsvRepository;
pub use records::{Keyed, PredictionRecord, RouteMappingRecord, ScheduleRecord, SnapshotRecord};

use anyhow::Result;

/// The four logical tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Snapshots,
    Predictions,
    Schedules,
    RouteHistory,
}

impl Table {
    pub const ALL: [Table; 4] = [
        Table::Snapshots,
        Table::Predictions,
        Table::Schedules,
        Table::RouteHistory,
    ];

    pub fn dir_name(self) -> &'static str {
        match self {
            Table::Snapshots => "snapshots",
            Table::Predictions => "predictions",
            Table::Schedules => "schedules",
            Table::RouteHistory => "route_history",
        }
    }
}

/// Persistence collaborator for the scheduling cycle. Queries return rows
/// newest first.
#[async_trait::async_trait]
pub trait Repository: Send + Sync {
    async fn put_snapshot(&self, record: &SnapshotRecord) -> Result<()>;
    async fn snapshots_by_route(&self, route_id: &str, limit: usize) -> Result<Vec<SnapshotRecord>>;

    async fn put_prediction(&self, record: &PredictionRecord) -> Result<()>;
    async fn predictions_by_route(&self, route_id: &str, limit: usize) -> Result<Vec<PredictionRecord>>;

    async fn put_schedule(&self, record: &ScheduleRecord) -> Result<()>;
    async fn latest_schedule(&self, route_id: &str) -> Result<Option<ScheduleRecord>>;

    async fn append_history(&self, record: &RouteMappingRecord) -> Result<()>;
    async fn latest_route_mapping(&self, route_id: &str) -> Result<Option<RouteMappingRecord>>;
}
