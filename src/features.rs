//! Calendar and lag/rolling features derived from a merged route frame.

use chrono::{Datelike, Timelike};
use ndarray::{Array1, Array2};

use crate::signals::SignalFrame;

/// Regressor inputs, in column order.
pub const FEATURE_NAMES: [&str; 8] = [
    "hour",
    "weekday",
    "month",
    "signal_lag1",
    "signal_lag2",
    "signal_roll3",
    "landing",
    "loader",
];

pub const MIX_LANDING_WEIGHT: f64 = 0.5;
pub const MIX_LOADER_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureRow {
    pub hour: f64,
    /// Monday = 0.
    pub weekday: f64,
    pub month: f64,
    pub signal: f64,
    pub signal_lag1: f64,
    pub signal_lag2: f64,
    pub signal_roll3: f64,
    pub landing: f64,
    pub loader: f64,
    pub mix: f64,
}

impl FeatureRow {
    /// The eight regressor inputs in [`FEATURE_NAMES`] order.
    pub fn inputs(&self) -> [f64; 8] {
        [
            self.hour,
            self.weekday,
            self.month,
            self.signal_lag1,
            self.signal_lag2,
            self.signal_roll3,
            self.landing,
            self.loader,
        ]
    }
}

/// Feature rows for one route, same length and order as the source frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    pub route_id: String,
    pub rows: Vec<FeatureRow>,
}

impl FeatureFrame {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn last(&self) -> Option<&FeatureRow> {
        self.rows.last()
    }

    /// Design matrix of the regressor inputs, one row per observation.
    pub fn design_matrix(&self) -> Array2<f64> {
        let mut x = Array2::zeros((self.rows.len(), FEATURE_NAMES.len()));
        for (i, row) in self.rows.iter().enumerate() {
            for (j, v) in row.inputs().into_iter().enumerate() {
                x[[i, j]] = v;
            }
        }
        x
    }

    /// Training label: `mix` scaled into seconds of delay.
    pub fn labels(&self, scale: f64) -> Array1<f64> {
        self.rows.iter().map(|r| r.mix * scale).collect()
    }
}

/// Derives the feature frame. Positions without enough history get 0; no row
/// is ever dropped.
pub fn build_features(frame: &SignalFrame) -> FeatureFrame {
    let signals: Vec<f64> = frame.rows.iter().map(|r| r.signal).collect();

    let rows = frame
        .rows
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let lag = |k: usize| if i >= k { signals[i - k] } else { 0.0 };
            let roll3 = if i >= 2 {
                (signals[i] + signals[i - 1] + signals[i - 2]) / 3.0
            } else {
                0.0
            };

            FeatureRow {
                hour: r.timestamp.hour() as f64,
                weekday: r.timestamp.weekday().num_days_from_monday() as f64,
                month: r.timestamp.month() as f64,
                signal: r.signal,
                signal_lag1: lag(1),
                signal_lag2: lag(2),
                signal_roll3: roll3,
                landing: r.landing,
                loader: r.loader,
                mix: roll3 + MIX_LANDING_WEIGHT * r.landing + MIX_LOADER_WEIGHT * r.loader,
            }
        })
        .collect();

    FeatureFrame {
        route_id: frame.route_id.clone(),
        rows,
    }
}
