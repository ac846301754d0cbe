//! Runtime settings from the environment (and `.env`), plus the route-mapping
//! file operators push.

use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::model::ForestParams;

/// Settings for the scheduling cycle and its collaborators.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory holding the boarding/landing/loader CSVs.
    pub data_dir: PathBuf,
    /// Root of the CSV tables.
    pub store_dir: PathBuf,
    pub google_maps_api_key: Option<String>,
    pub cycle_interval: Duration,
    pub window_minutes: u32,
    pub num_buses: usize,
    pub enable_scheduler: bool,
    /// Routes processed concurrently.
    pub workers: usize,
    pub forest: ForestParams,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            store_dir: PathBuf::from("store"),
            google_maps_api_key: None,
            cycle_interval: Duration::from_secs(300),
            window_minutes: 60,
            num_buses: 6,
            enable_scheduler: true,
            workers: default_workers(),
            forest: ForestParams::default(),
        }
    }
}

/// One worker per available core.
pub fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => {
            let value = raw
                .trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for {key}: '{raw}'"))?;
            Ok(Some(value))
        }
        _ => Ok(None),
    }
}

impl Settings {
    /// Reads settings from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`, falling back to defaults for unset keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut s = Settings::default();

        if let Some(dir) = lookup("DATA_DIR").filter(|v| !v.is_empty()) {
            s.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("STORE_DIR").filter(|v| !v.is_empty()) {
            s.store_dir = PathBuf::from(dir);
        }
        s.google_maps_api_key = lookup("GOOGLE_MAPS_API_KEY").filter(|v| !v.is_empty());

        if let Some(secs) = parse_var::<u64>(&lookup, "CYCLE_INTERVAL_SECS")? {
            s.cycle_interval = Duration::from_secs(secs);
        }
        if let Some(w) = parse_var::<u32>(&lookup, "WINDOW_MINUTES")? {
            if w == 0 {
                bail!("WINDOW_MINUTES must be at least 1");
            }
            s.window_minutes = w;
        }
        if let Some(n) = parse_var(&lookup, "NUM_BUSES")? {
            s.num_buses = n;
        }
        if let Some(flag) = lookup("ENABLE_SCHEDULER") {
            s.enable_scheduler = flag.trim() == "1";
        }
        if let Some(w) = parse_var::<usize>(&lookup, "WORKERS")? {
            s.workers = w.max(1);
        }
        if let Some(trees) = parse_var(&lookup, "FOREST_TREES")? {
            s.forest.n_estimators = trees;
        }
        if let Some(seed) = parse_var(&lookup, "FOREST_SEED")? {
            s.forest.seed = seed;
        }

        Ok(s)
    }
}

/// Route id to `[origin, destination]`, as pushed by operators:
///
/// ```json
/// {
///   "12345": ["Central Station", "Airport Terminal 2"],
///   "67890": ["Harbour", "University"]
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct RouteMappingFile {
    entries: BTreeMap<String, (String, String)>,
}

impl RouteMappingFile {
    /// Loads the mapping from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading route mapping file '{path}'"))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let entries: BTreeMap<String, (String, String)> =
            serde_json::from_str(content).context("route mapping must be {route_id: [origin, destination]}")?;
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all `(route_id, origin, destination)` triples.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.entries
            .iter()
            .map(|(k, (o, d))| (k.as_str(), o.as_str(), d.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let s = Settings::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(s.window_minutes, 60);
        assert_eq!(s.num_buses, 6);
        assert_eq!(s.cycle_interval, Duration::from_secs(300));
        assert!(s.enable_scheduler);
        assert!(s.google_maps_api_key.is_none());
        assert_eq!(s.forest.n_estimators, 140);
        assert_eq!(s.forest.seed, 42);
        assert!(s.workers >= 1);
    }

    #[test]
    fn test_overrides() {
        let s = Settings::from_lookup(lookup_from(&[
            ("DATA_DIR", "/srv/signals"),
            ("GOOGLE_MAPS_API_KEY", "abc"),
            ("CYCLE_INTERVAL_SECS", "60"),
            ("WINDOW_MINUTES", "30"),
            ("NUM_BUSES", "4"),
            ("ENABLE_SCHEDULER", "0"),
            ("WORKERS", "0"),
            ("FOREST_TREES", "50"),
        ]))
        .unwrap();

        assert_eq!(s.data_dir, PathBuf::from("/srv/signals"));
        assert_eq!(s.google_maps_api_key.as_deref(), Some("abc"));
        assert_eq!(s.cycle_interval, Duration::from_secs(60));
        assert_eq!(s.window_minutes, 30);
        assert_eq!(s.num_buses, 4);
        assert!(!s.enable_scheduler);
        assert_eq!(s.workers, 1);
        assert_eq!(s.forest.n_estimators, 50);
    }

    #[test]
    fn test_bad_number_is_reported() {
        let err = Settings::from_lookup(lookup_from(&[("WINDOW_MINUTES", "sixty")])).unwrap_err();
        assert!(err.to_string().contains("WINDOW_MINUTES"));
    }

    #[test]
    fn test_zero_window_is_rejected() {
        let err = Settings::from_lookup(lookup_from(&[("WINDOW_MINUTES", "0")])).unwrap_err();
        assert!(err.to_string().contains("WINDOW_MINUTES"));
    }

    #[test]
    fn test_route_mapping_json() {
        let mapping = RouteMappingFile::from_json(
            r#"{"67890": ["Harbour", "University"], "12345": ["Central", "Airport"]}"#,
        )
        .unwrap();
        let rows: Vec<_> = mapping.iter().collect();
        assert_eq!(rows[0], ("12345", "Central", "Airport"));
        assert_eq!(mapping.len(), 2);

        assert!(RouteMappingFile::from_json(r#"{"12345": "Central"}"#).is_err());
    }
}
