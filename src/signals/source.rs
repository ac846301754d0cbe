use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::frame::{SignalFrame, SignalRow};
use super::table::SignalTable;
use crate::error::{PlannerError, Result};

/// The three per-route series the loader merges, located by file-name prefix.
#[derive(Debug, Clone)]
pub struct SignalSource {
    data_dir: PathBuf,
}

impl SignalSource {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Reads all three sources.
    ///
    /// # Errors
    ///
    /// [`PlannerError::DataNotFound`] if the directory is missing or any of the
    /// boarding, landing or loader CSVs cannot be found in it.
    #[tracing::instrument(skip(self), fields(data_dir = %self.data_dir.display()))]
    pub fn read(&self) -> Result<SignalTables> {
        let boarding = self.locate("boarding")?;
        let landing = self.locate("landing")?;
        let loader = self.locate("loader")?;

        Ok(SignalTables {
            boarding: SignalTable::read(&boarding)?,
            landing: SignalTable::read(&landing)?,
            loader: SignalTable::read(&loader)?,
        })
    }

    /// Shorthand for reading the sources and discovering the route ids.
    pub fn route_ids(&self) -> Result<Vec<String>> {
        Ok(self.read()?.route_ids())
    }

    /// Shorthand for reading the sources and merging one route.
    pub fn load_route(&self, route_id: &str) -> Result<SignalFrame> {
        self.read()?.merge_route(route_id)
    }

    /// First `*.csv` file, by sorted name, whose lower-cased name starts with `prefix`.
    fn locate(&self, prefix: &str) -> Result<PathBuf> {
        let missing = || {
            PlannerError::DataNotFound(format!(
                "boarding/landing/loader CSVs not found in {}",
                self.data_dir.display()
            ))
        };

        let entries = fs::read_dir(&self.data_dir).map_err(|_| missing())?;

        let mut candidates: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            candidates.push(path);
        }
        candidates.sort();

        candidates
            .into_iter()
            .find(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.to_lowercase().starts_with(prefix))
            })
            .ok_or_else(missing)
    }
}

/// The boarding, landing and loader tables read from one data directory.
#[derive(Debug, Clone)]
pub struct SignalTables {
    pub boarding: SignalTable,
    pub landing: SignalTable,
    pub loader: SignalTable,
}

/// Route ids are 5-6 digit column headers.
fn looks_like_route_id(name: &str) -> bool {
    (5..=6).contains(&name.chars().count()) && name.chars().all(|c| c.is_ascii_digit())
}

impl SignalTables {
    /// Route ids discovered from the boarding header, first occurrence only.
    /// Falls back to every non-timestamp column when no header looks like a
    /// route id.
    pub fn route_ids(&self) -> Vec<String> {
        let columns = self.boarding.columns();
        let mut seen = HashSet::new();
        let ids: Vec<String> = columns
            .iter()
            .filter(|c| looks_like_route_id(c))
            .filter(|c| seen.insert(c.as_str()))
            .cloned()
            .collect();

        if !ids.is_empty() {
            return ids;
        }
        seen.clear();
        columns
            .iter()
            .filter(|c| seen.insert(c.as_str()))
            .cloned()
            .collect()
    }

    /// Builds the merged frame for `route_id`.
    ///
    /// An id missing from the boarding source is replaced by the first
    /// discovered route; callers must read the id back from the frame.
    /// Landing and loader fall back to their first column when the route is
    /// not in their header.
    pub fn merge_route(&self, route_id: &str) -> Result<SignalFrame> {
        let route = if self.boarding.has_column(route_id) {
            route_id.to_string()
        } else {
            let fallback = self.route_ids().into_iter().next().ok_or_else(|| {
                PlannerError::DataNotFound(format!(
                    "no route ids detected in {}",
                    self.boarding.path().display()
                ))
            })?;
            warn!(requested = route_id, substituted = %fallback, "Route not in boarding source, using first route");
            fallback
        };

        let signal = self.boarding.values(&route)?;
        let landing = aligned_lookup(&self.landing, &route)?;
        let loader = aligned_lookup(&self.loader, &route)?;

        let rows = self
            .boarding
            .timestamps()
            .iter()
            .zip(signal)
            .map(|(ts, signal)| SignalRow {
                timestamp: *ts,
                signal,
                landing: landing.get(ts).copied().unwrap_or(0.0),
                loader: loader.get(ts).copied().unwrap_or(0.0),
            })
            .collect();

        let frame = SignalFrame::new(route, rows);
        debug!(route_id = %frame.route_id, rows = frame.len(), "Route frame merged");
        Ok(frame)
    }
}

/// Indexes a secondary source by timestamp for the left join. The first row
/// wins on duplicate timestamps.
fn aligned_lookup(table: &SignalTable, route: &str) -> Result<HashMap<DateTime<Utc>, f64>> {
    let values = if table.has_column(route) {
        table.values(route)?
    } else {
        table.first_values()?
    };

    let mut by_ts = HashMap::with_capacity(values.len());
    for (ts, v) in table.timestamps().iter().zip(values) {
        by_ts.entry(*ts).or_insert(v);
    }
    Ok(by_ts)
}
