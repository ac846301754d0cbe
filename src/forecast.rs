//! Per-minute delay forecasting.
//!
//! A forest is trained from scratch on the full history of one route, then
//! rolled forward one minute at a time from the last observed row. Each step
//! feeds its own prediction back into the lag/rolling state.

use chrono::{DateTime, Duration, Utc};
use ndarray::ArrayView1;
use serde::Serialize;
use tracing::debug;

use crate::error::{PlannerError, Result};
use crate::features::{FEATURE_NAMES, FeatureFrame, FeatureRow, build_features};
use crate::model::{ForestParams, RandomForest};
use crate::signals::SignalTables;

pub const MODEL_VERSION: &str = "rf_v1";

/// Training label is `mix * LABEL_SCALE`; predictions are scaled back by the
/// same factor when they re-enter the rolling mean.
pub const LABEL_SCALE: f64 = 10.0;

/// Per-minute decay applied to landing and loader counts during rollout.
pub const EXOGENOUS_DECAY: f64 = 0.95;

/// One minute of a route's forecast.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DelayForecast {
    pub route_id: String,
    pub offset_minute: u32,
    pub predicted_delay_seconds: f64,
    pub model_version: String,
}

/// Regressor inputs carried from one rollout step to the next.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RolloutState {
    pub hour: f64,
    pub weekday: f64,
    pub month: f64,
    pub lag1: f64,
    pub lag2: f64,
    pub roll3: f64,
    pub landing: f64,
    pub loader: f64,
}

impl RolloutState {
    pub fn from_row(row: &FeatureRow) -> Self {
        Self {
            hour: row.hour,
            weekday: row.weekday,
            month: row.month,
            lag1: row.signal_lag1,
            lag2: row.signal_lag2,
            roll3: row.signal_roll3,
            landing: row.landing,
            loader: row.loader,
        }
    }

    /// Inputs in the same column order the forest was trained on.
    pub fn inputs(&self) -> [f64; 8] {
        [
            self.hour,
            self.weekday,
            self.month,
            self.lag1,
            self.lag2,
            self.roll3,
            self.landing,
            self.loader,
        ]
    }

    /// Moves the state one minute forward given the raw (unclamped) prediction.
    pub fn advance(&mut self, yhat: f64) {
        self.lag2 = self.lag1;
        self.lag1 = self.roll3;
        self.roll3 = (self.roll3 * 2.0 + yhat / LABEL_SCALE) / 3.0;
        self.hour = (self.hour + 1.0 / 60.0) % 24.0;
        self.landing = (self.landing * EXOGENOUS_DECAY).max(0.0);
        self.loader = (self.loader * EXOGENOUS_DECAY).max(0.0);
    }
}

/// The forecast for one route starting at `start_time`.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteForecast {
    /// Route the history came from; may differ from the requested id.
    pub route_id: String,
    pub start_time: DateTime<Utc>,
    pub model_version: String,
    /// Non-negative predicted delay in seconds, one per minute.
    pub delays: Vec<f64>,
}

impl RouteForecast {
    pub fn entries(&self) -> Vec<DelayForecast> {
        self.delays
            .iter()
            .enumerate()
            .map(|(i, &d)| DelayForecast {
                route_id: self.route_id.clone(),
                offset_minute: i as u32,
                predicted_delay_seconds: d,
                model_version: self.model_version.clone(),
            })
            .collect()
    }

    /// Wall-clock time of the forecast minute at `offset`.
    pub fn timestamp_at(&self, offset: usize) -> DateTime<Utc> {
        self.start_time + Duration::minutes(offset as i64)
    }
}

/// Trains a fresh forest per call; holds no model between calls.
#[derive(Debug, Clone)]
pub struct Forecaster {
    params: ForestParams,
    model_version: String,
}

impl Default for Forecaster {
    fn default() -> Self {
        Self::new(ForestParams::default())
    }
}

impl Forecaster {
    pub fn new(params: ForestParams) -> Self {
        Self {
            params,
            model_version: MODEL_VERSION.to_string(),
        }
    }

    pub fn with_model_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = version.into();
        self
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    /// Fits the forest on every row of `features`.
    pub fn fit(&self, features: &FeatureFrame) -> Result<RandomForest> {
        if features.is_empty() {
            return Err(PlannerError::DataNotFound(format!(
                "no history rows for route {}",
                features.route_id
            )));
        }

        let x = features.design_matrix();
        let y = features.labels(LABEL_SCALE);

        let mut forest = RandomForest::new(self.params.clone());
        forest.fit(&x, &y)?;

        if let Some(imp) = forest.feature_importances() {
            let ranked: Vec<String> = FEATURE_NAMES
                .iter()
                .zip(imp.iter())
                .map(|(name, v)| format!("{name}={v:.3}"))
                .collect();
            debug!(route_id = %features.route_id, rows = features.len(), importances = ?ranked, "Forest fitted");
        }

        Ok(forest)
    }

    /// Recursive rollout of `horizon_minutes` steps from the last feature row.
    pub fn forecast_features(&self, features: &FeatureFrame, horizon_minutes: usize) -> Result<Vec<f64>> {
        let forest = self.fit(features)?;
        let last = features.last().ok_or_else(|| {
            PlannerError::DataNotFound(format!("no history rows for route {}", features.route_id))
        })?;

        let mut state = RolloutState::from_row(last);
        let mut out = Vec::with_capacity(horizon_minutes);

        for _ in 0..horizon_minutes {
            let inputs = state.inputs();
            let yhat = forest.predict_one(ArrayView1::from(&inputs[..]))?;
            out.push(yhat.max(0.0));
            state.advance(yhat);
        }

        Ok(out)
    }

    /// Loads the route, builds features and forecasts `horizon_minutes`
    /// minutes from `start_time`.
    #[tracing::instrument(skip(self, tables, start_time))]
    pub fn forecast(
        &self,
        tables: &SignalTables,
        route_id: &str,
        start_time: DateTime<Utc>,
        horizon_minutes: usize,
    ) -> Result<RouteForecast> {
        let frame = tables.merge_route(route_id)?;
        let features = build_features(&frame);
        let delays = self.forecast_features(&features, horizon_minutes)?;

        Ok(RouteForecast {
            route_id: frame.route_id,
            start_time,
            model_version: self.model_version.clone(),
            delays,
        })
    }
}
