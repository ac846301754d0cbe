use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::records::{Keyed, PredictionRecord, RouteMappingRecord, ScheduleRecord, SnapshotRecord};
use super::{Repository, Table};
use crate::output::{append_record, read_records};

/// Stores each table as one CSV per route under
/// `<root>/<table>/route_id=<id>.csv`.
#[derive(Debug, Clone)]
pub struct CsvRepository {
    root: PathBuf,
}

impl CsvRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File backing `table` for `route_id`. The id is percent-encoded, so
    /// distinct ids never share a file.
    pub fn table_path(&self, table: Table, route_id: &str) -> PathBuf {
        self.root
            .join(table.dir_name())
            .join(format!("route_id={}.csv", encode_route_id(route_id)))
    }

    /// Route ids that have a file for `table`.
    pub fn routes_in(&self, table: Table) -> Result<Vec<String>> {
        let dir = self.root.join(table.dir_name());
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(encoded) = name
                .strip_prefix("route_id=")
                .and_then(|rest| rest.strip_suffix(".csv"))
            else {
                continue;
            };
            match decode_route_id(encoded) {
                Some(id) => ids.push(id),
                None => warn!(file = name, "Skipping table file with undecodable route id"),
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn append(&self, table: Table, route_id: &str, record: &impl Serialize) -> Result<()> {
        append_record(&self.table_path(table, route_id), record)
    }

    /// Rows of `route_id` newest first; rows appended later win ties.
    fn newest_first<T>(&self, table: Table, route_id: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Keyed,
    {
        let mut rows: Vec<T> = read_records(&self.table_path(table, route_id))?;
        rows.retain(|r| r.route_id() == route_id);
        rows.reverse();
        rows.sort_by_key(|r| std::cmp::Reverse(r.timestamp()));
        Ok(rows)
    }
}

/// Keeps `[A-Za-z0-9_-]` and writes every other byte as `%XX`.
fn encode_route_id(route_id: &str) -> String {
    let mut out = String::with_capacity(route_id.len());
    for b in route_id.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

fn decode_route_id(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[async_trait]
impl Repository for CsvRepository {
    async fn put_snapshot(&self, record: &SnapshotRecord) -> Result<()> {
        self.append(Table::Snapshots, &record.route_id, record)
    }

    async fn snapshots_by_route(&self, route_id: &str, limit: usize) -> Result<Vec<SnapshotRecord>> {
        let mut rows: Vec<SnapshotRecord> = self.newest_first(Table::Snapshots, route_id)?;
        rows.truncate(limit);
        Ok(rows)
    }

    async fn put_prediction(&self, record: &PredictionRecord) -> Result<()> {
        self.append(Table::Predictions, &record.route_id, record)
    }

    async fn predictions_by_route(&self, route_id: &str, limit: usize) -> Result<Vec<PredictionRecord>> {
        let mut rows: Vec<PredictionRecord> = self.newest_first(Table::Predictions, route_id)?;
        rows.truncate(limit);
        Ok(rows)
    }

    async fn put_schedule(&self, record: &ScheduleRecord) -> Result<()> {
        self.append(Table::Schedules, &record.route_id, record)
    }

    async fn latest_schedule(&self, route_id: &str) -> Result<Option<ScheduleRecord>> {
        let rows: Vec<ScheduleRecord> = self.newest_first(Table::Schedules, route_id)?;
        Ok(rows.into_iter().next())
    }

    async fn append_history(&self, record: &RouteMappingRecord) -> Result<()> {
        self.append(Table::RouteHistory, &record.route_id, record)
    }

    async fn latest_route_mapping(&self, route_id: &str) -> Result<Option<RouteMappingRecord>> {
        let rows: Vec<RouteMappingRecord> = self.newest_first(Table::RouteHistory, route_id)?;
        Ok(rows.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn scratch(name: &str) -> CsvRepository {
        let dir = std::env::temp_dir().join(name);
        let _ = std::fs::remove_dir_all(&dir);
        CsvRepository::new(dir)
    }

    #[test]
    fn test_table_path_layout() {
        let repo = CsvRepository::new("/var/store");
        assert_eq!(
            repo.table_path(Table::Predictions, "12345"),
            PathBuf::from("/var/store/predictions/route_id=12345.csv")
        );
        assert_eq!(
            repo.table_path(Table::RouteHistory, "../x"),
            PathBuf::from("/var/store/route_history/route_id=%2E%2E%2Fx.csv")
        );
    }

    #[tokio::test]
    async fn test_predictions_newest_first_with_limit() {
        let repo = scratch("tdp_repo_predictions");
        let start = Utc.with_ymd_and_hms(2024, 3, 5, 7, 0, 0).unwrap();

        for i in 0..5 {
            repo.put_prediction(&PredictionRecord {
                route_id: "12345".into(),
                timestamp: start + Duration::minutes(i),
                predicted_delay_sec: i * 10,
                model_version: "rf_v1".into(),
            })
            .await
            .unwrap();
        }

        let rows = repo.predictions_by_route("12345", 3).await.unwrap();
        let delays: Vec<i64> = rows.iter().map(|r| r.predicted_delay_sec).collect();
        assert_eq!(delays, vec![40, 30, 20]);

        assert!(repo.predictions_by_route("67890", 3).await.unwrap().is_empty());
        assert_eq!(repo.routes_in(Table::Predictions).unwrap(), vec!["12345".to_string()]);

        std::fs::remove_dir_all(repo.root()).unwrap();
    }

    #[tokio::test]
    async fn test_latest_mapping_prefers_last_appended_on_tie() {
        let repo = scratch("tdp_repo_mapping");
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 7, 0, 0).unwrap();

        assert!(repo.latest_route_mapping("12345").await.unwrap().is_none());

        for (origin, destination) in [("A", "B"), ("C", "D")] {
            repo.append_history(&RouteMappingRecord {
                route_id: "12345".into(),
                timestamp: ts,
                origin: origin.into(),
                destination: destination.into(),
            })
            .await
            .unwrap();
        }

        let mapping = repo.latest_route_mapping("12345").await.unwrap().unwrap();
        assert_eq!(mapping.origin, "C");
        assert_eq!(mapping.destination, "D");

        std::fs::remove_dir_all(repo.root()).unwrap();
    }

    #[tokio::test]
    async fn test_latest_schedule_and_snapshots() {
        let repo = scratch("tdp_repo_schedule");
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 7, 0, 0).unwrap();

        for (i, fitness) in [1.0, 2.0].into_iter().enumerate() {
            repo.put_schedule(&ScheduleRecord {
                route_id: "12345".into(),
                timestamp: ts + Duration::minutes(5 * i as i64),
                departures_minutes: vec![0, 29, 59],
                fitness,
            })
            .await
            .unwrap();
        }
        let latest = repo.latest_schedule("12345").await.unwrap().unwrap();
        assert_eq!(latest.fitness, 2.0);
        assert_eq!(latest.departures_minutes, vec![0, 29, 59]);

        repo.put_snapshot(&SnapshotRecord {
            route_id: "12345".into(),
            timestamp: ts,
            distance_m: 1200,
            duration_s: 300,
            duration_in_traffic_s: 420,
            source: "google_maps".into(),
        })
        .await
        .unwrap();
        let snaps = repo.snapshots_by_route("12345", 100).await.unwrap();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].duration_in_traffic_s, 420);

        std::fs::remove_dir_all(repo.root()).unwrap();
    }

    #[test]
    fn test_route_id_encoding_round_trips() {
        for id in ["12345", "Route 1", "Route_1", "a%2Fb", "Línea 7/b"] {
            assert_eq!(decode_route_id(&encode_route_id(id)).as_deref(), Some(id));
        }
        assert_ne!(encode_route_id("Route 1"), encode_route_id("Route_1"));
        assert!(decode_route_id("bad%2").is_none());
    }

    #[tokio::test]
    async fn test_similar_route_ids_stay_separate() {
        let repo = scratch("tdp_repo_similar_ids");
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 7, 0, 0).unwrap();

        repo.put_schedule(&ScheduleRecord {
            route_id: "Route_1".into(),
            timestamp: ts,
            departures_minutes: vec![0, 59],
            fitness: 9.0,
        })
        .await
        .unwrap();

        assert!(repo.latest_schedule("Route 1").await.unwrap().is_none());
        assert_eq!(repo.latest_schedule("Route_1").await.unwrap().unwrap().fitness, 9.0);

        repo.put_schedule(&ScheduleRecord {
            route_id: "Route 1".into(),
            timestamp: ts,
            departures_minutes: vec![0, 59],
            fitness: 1.0,
        })
        .await
        .unwrap();
        assert_eq!(repo.latest_schedule("Route 1").await.unwrap().unwrap().fitness, 1.0);
        assert_eq!(
            repo.routes_in(Table::Schedules).unwrap(),
            vec!["Route 1".to_string(), "Route_1".to_string()]
        );

        std::fs::remove_dir_all(repo.root()).unwrap();
    }

    #[tokio::test]
    async fn test_rows_of_other_routes_are_ignored() {
        let repo = scratch("tdp_repo_foreign_rows");
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 7, 0, 0).unwrap();

        // A row for another route that ended up in this route's file.
        let path = repo.table_path(Table::Predictions, "12345");
        append_record(
            &path,
            &PredictionRecord {
                route_id: "67890".into(),
                timestamp: ts,
                predicted_delay_sec: 5,
                model_version: "rf_v1".into(),
            },
        )
        .unwrap();

        assert!(repo.predictions_by_route("12345", 10).await.unwrap().is_empty());

        std::fs::remove_dir_all(repo.root()).unwrap();
    }
}
