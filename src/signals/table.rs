use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use csv::ReaderBuilder;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{PlannerError, Result};

/// Naive layouts accepted for the timestamp column, tried in order after RFC 3339.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%d-%m-%Y %H:%M",
    "%d/%m/%Y %H:%M",
];

/// Parses a timestamp cell. Naive values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(ts.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}

/// One raw source: a timestamp column followed by one column per route.
///
/// Cells are kept as text and parsed per column on demand, so a bad cell in
/// one route's column only fails loads of that route.
#[derive(Debug, Clone)]
pub struct SignalTable {
    path: PathBuf,
    columns: Vec<String>,
    timestamps: Vec<DateTime<Utc>>,
    cells: Vec<Vec<String>>,
}

impl SignalTable {
    /// Reads a CSV source. Whatever the first header is called, it is the
    /// timestamp column.
    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut rdr = ReaderBuilder::new().flexible(true).from_reader(file);

        let headers = rdr.headers()?.clone();
        let columns: Vec<String> = headers.iter().skip(1).map(|h| h.trim().to_string()).collect();

        let mut timestamps = Vec::new();
        let mut cells: Vec<Vec<String>> = vec![Vec::new(); columns.len()];

        for (line, record) in rdr.records().enumerate() {
            let record = record?;
            let raw_ts = record.get(0).unwrap_or("");
            let ts = parse_timestamp(raw_ts).ok_or_else(|| PlannerError::MalformedData {
                path: path.to_path_buf(),
                message: format!("row {}: unparseable timestamp '{}'", line + 1, raw_ts),
            })?;
            timestamps.push(ts);

            for (col, column_cells) in cells.iter_mut().enumerate() {
                column_cells.push(record.get(col + 1).unwrap_or("").trim().to_string());
            }
        }

        debug!(
            path = %path.display(),
            rows = timestamps.len(),
            columns = columns.len(),
            "Signal table read"
        );

        Ok(Self {
            path: path.to_path_buf(),
            columns,
            timestamps,
            cells,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Non-timestamp column names, in header order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Numeric values of the named column; empty cells read as 0.
    pub fn values(&self, name: &str) -> Result<Vec<f64>> {
        let idx = self
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| PlannerError::DataNotFound(format!(
                "column '{}' not in {}",
                name,
                self.path.display()
            )))?;
        self.values_at(idx)
    }

    /// Values of the first non-timestamp column.
    pub fn first_values(&self) -> Result<Vec<f64>> {
        if self.columns.is_empty() {
            return Err(PlannerError::DataNotFound(format!(
                "{} has no columns besides timestamp",
                self.path.display()
            )));
        }
        self.values_at(0)
    }

    fn values_at(&self, idx: usize) -> Result<Vec<f64>> {
        self.cells[idx]
            .iter()
            .enumerate()
            .map(|(row, cell)| {
                if cell.is_empty() {
                    return Ok(0.0);
                }
                cell.parse::<f64>()
                    .map(|v| if v.is_nan() { 0.0 } else { v })
                    .map_err(|_| PlannerError::MalformedData {
                        path: self.path.clone(),
                        message: format!(
                            "row {}, column '{}': non-numeric value '{}'",
                            row + 1,
                            self.columns[idx],
                            cell
                        ),
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_timestamp_formats() {
        let a = parse_timestamp("2024-03-05 07:15:00").unwrap();
        let b = parse_timestamp("2024-03-05T07:15:00Z").unwrap();
        let c = parse_timestamp("2024-03-05 07:15").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.hour(), 7);

        let d = parse_timestamp("05-03-2024 07:15").unwrap();
        assert_eq!(d, a);

        let day = parse_timestamp("2024-03-05").unwrap();
        assert_eq!(day.day(), 5);
        assert_eq!(day.hour(), 0);
    }

    #[test]
    fn test_parse_timestamp_offset_is_normalized() {
        let ts = parse_timestamp("2024-03-05T09:15:00+02:00").unwrap();
        assert_eq!(ts.hour(), 7);
    }

    #[test]
    fn test_parse_timestamp_garbage() {
        assert!(parse_timestamp("not a time").is_none());
        assert!(parse_timestamp("").is_none());
    }

    fn write_temp(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_read_renames_first_column_and_zero_fills() {
        let path = write_temp(
            "tdp_table_read.csv",
            "Time,12345,67890\n2024-03-05 07:00:00,3,\n2024-03-05 07:01:00,4\n",
        );
        let table = SignalTable::read(&path).unwrap();

        assert_eq!(table.columns(), &["12345".to_string(), "67890".to_string()]);
        assert_eq!(table.timestamps().len(), 2);
        assert_eq!(table.values("12345").unwrap(), vec![3.0, 4.0]);
        assert_eq!(table.values("67890").unwrap(), vec![0.0, 0.0]);
        assert_eq!(table.first_values().unwrap(), vec![3.0, 4.0]);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_read_rejects_bad_timestamp() {
        let path = write_temp("tdp_table_bad_ts.csv", "timestamp,12345\nyesterday,3\n");
        let err = SignalTable::read(&path).unwrap_err();
        assert!(matches!(err, PlannerError::MalformedData { .. }));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_bad_cell_only_fails_its_column() {
        let path = write_temp(
            "tdp_table_bad_cell.csv",
            "timestamp,12345,67890\n2024-03-05 07:00:00,x,1\n",
        );
        let table = SignalTable::read(&path).unwrap();
        assert!(matches!(
            table.values("12345"),
            Err(PlannerError::MalformedData { .. })
        ));
        assert_eq!(table.values("67890").unwrap(), vec![1.0]);
        std::fs::remove_file(&path).unwrap();
    }
}
