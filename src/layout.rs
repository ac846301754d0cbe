//! Departure layout and fitness scoring.
//!
//! Departures are laid out in closed form, evenly spaced across the window.
//! Nothing is searched; the fitness score only reports how regular the
//! spacing is and how low the predicted risk over the window looks.

use serde::{Deserialize, Serialize};

use crate::stats::{mean, round_to, variance};

/// Keeps both fitness terms finite when variance or risk is zero.
pub const FITNESS_EPSILON: f64 = 1e-6;

/// Weight of each fitness term.
const SPACING_WEIGHT: f64 = 0.5;
const RISK_WEIGHT: f64 = 0.5;

/// Result of one layout run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleLayout {
    pub departures_minutes: Vec<u32>,
    pub fitness: f64,
}

/// `num_buses` minute offsets spread linearly from 0 to `window_minutes - 1`,
/// truncated to whole minutes. Both arguments are clamped to at least 1.
pub fn even_departures(num_buses: usize, window_minutes: u32) -> Vec<u32> {
    let n = num_buses.max(1);
    let stop = (window_minutes.max(1) - 1) as f64;

    if n == 1 {
        return vec![0];
    }

    let step = stop / (n - 1) as f64;
    (0..n)
        .map(|i| {
            // the last point is pinned to the endpoint
            let v = if i == n - 1 { stop } else { i as f64 * step };
            v as u32
        })
        .collect()
}

/// Gaps between consecutive departures, bracketed by 0 and the window end.
pub fn departure_gaps(departures: &[u32], window_minutes: u32) -> Vec<f64> {
    let mut points = Vec::with_capacity(departures.len() + 2);
    points.push(0.0);
    points.extend(departures.iter().map(|&d| d as f64));
    points.push(window_minutes as f64);
    points.windows(2).map(|w| w[1] - w[0]).collect()
}

/// `0.5 / (var(gaps) + ε) + 0.5 / (mean(risk) + ε)`, rounded to 5 decimals.
///
/// Higher is better: even spacing and low predicted delay both raise it.
pub fn fitness(departures: &[u32], window_minutes: u32, risk: &[f64]) -> f64 {
    let gaps = departure_gaps(departures, window_minutes);
    let raw = SPACING_WEIGHT / (variance(&gaps) + FITNESS_EPSILON)
        + RISK_WEIGHT / (mean(risk) + FITNESS_EPSILON);
    round_to(raw, 5)
}

/// Lays out `num_buses` departures over `window_minutes` and scores them
/// against the first `window_minutes` predicted delays.
///
/// An empty forecast is not an error: the layout is returned with fitness 0.
pub fn optimize_schedule(num_buses: usize, window_minutes: u32, predicted_delays: &[f64]) -> ScheduleLayout {
    let window = window_minutes.max(1);
    let departures = even_departures(num_buses, window);

    if predicted_delays.is_empty() {
        return ScheduleLayout {
            departures_minutes: departures,
            fitness: 0.0,
        };
    }

    let horizon = predicted_delays.len().min(window as usize);
    let risk = &predicted_delays[..horizon];
    let fitness = fitness(&departures, window, risk);

    ScheduleLayout {
        departures_minutes: departures,
        fitness,
    }
}
