//! One scheduling cycle: snapshot travel times, then forecast and lay out
//! departures for every discoverable route.
//!
//! Routes are independent. Each one is forecast on the blocking pool behind
//! a semaphore sized to the worker count, and a failing route is recorded in
//! the [`CycleReport`] without stopping the others.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, error, info, warn};

use crate::forecast::{Forecaster, RouteForecast};
use crate::layout::{ScheduleLayout, optimize_schedule};
use crate::lookup::{TravelTime, TravelTimeLookup};
use crate::signals::{SignalSource, SignalTables};
use crate::store::{PredictionRecord, Repository, ScheduleRecord, SnapshotRecord};

pub const SNAPSHOT_SOURCE: &str = "google_maps";

/// Knobs for one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleConfig {
    /// Forecast horizon and schedule window, in minutes.
    pub window_minutes: u32,
    pub num_buses: usize,
    /// Routes forecast concurrently.
    pub workers: usize,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            window_minutes: 60,
            num_buses: 6,
            workers: crate::config::default_workers(),
        }
    }
}

/// Forecast and layout for one route, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutePlan {
    pub forecast: RouteForecast,
    pub layout: ScheduleLayout,
}

/// Loads, forecasts and lays out one route. Blocking and CPU-bound.
///
/// A zero window is treated as one minute, for the forecast and the layout
/// alike.
pub fn plan_route(
    forecaster: &Forecaster,
    tables: &SignalTables,
    route_id: &str,
    start_time: DateTime<Utc>,
    window_minutes: u32,
    num_buses: usize,
) -> crate::error::Result<RoutePlan> {
    let window_minutes = window_minutes.max(1);
    let forecast = forecaster.forecast(tables, route_id, start_time, window_minutes as usize)?;
    let layout = optimize_schedule(num_buses, window_minutes, &forecast.delays);
    Ok(RoutePlan { forecast, layout })
}

/// Appends the plan's predictions, then its schedule. The two writes are
/// independent; predictions already written stay if the schedule fails.
pub async fn persist_plan(repo: &dyn Repository, plan: &RoutePlan) -> Result<usize> {
    let forecast = &plan.forecast;

    for (i, delay) in forecast.delays.iter().enumerate() {
        repo.put_prediction(&PredictionRecord {
            route_id: forecast.route_id.clone(),
            timestamp: forecast.timestamp_at(i),
            predicted_delay_sec: *delay as i64,
            model_version: forecast.model_version.clone(),
        })
        .await
        .with_context(|| format!("writing prediction {i} for route {}", forecast.route_id))?;
    }

    repo.put_schedule(&ScheduleRecord {
        route_id: forecast.route_id.clone(),
        timestamp: forecast.start_time,
        departures_minutes: plan.layout.departures_minutes.clone(),
        fitness: plan.layout.fitness,
    })
    .await
    .with_context(|| format!("writing schedule for route {}", forecast.route_id))?;

    Ok(forecast.delays.len())
}

pub fn snapshot_record(route_id: &str, timestamp: DateTime<Utc>, tt: &TravelTime) -> SnapshotRecord {
    SnapshotRecord {
        route_id: route_id.to_string(),
        timestamp,
        distance_m: tt.distance_m,
        duration_s: tt.duration_s,
        duration_in_traffic_s: tt.duration_in_traffic_s,
        source: SNAPSHOT_SOURCE.to_string(),
    }
}

/// Looks up one route's current travel time and appends it as a snapshot.
/// Returns `None`, with nothing written, when the lookup has no answer.
#[tracing::instrument(skip(repo, lookup, now))]
pub async fn ingest_snapshot(
    repo: &dyn Repository,
    lookup: &dyn TravelTimeLookup,
    route_id: &str,
    origin: &str,
    destination: &str,
    now: DateTime<Utc>,
) -> Result<Option<SnapshotRecord>> {
    if route_id.trim().is_empty() || origin.trim().is_empty() || destination.trim().is_empty() {
        bail!("route_id, origin and destination are required");
    }

    let Some(tt) = lookup.lookup(origin, destination).await else {
        warn!("No travel time available, nothing ingested");
        return Ok(None);
    };

    let record = snapshot_record(route_id, now, &tt);
    repo.put_snapshot(&record)
        .await
        .with_context(|| format!("writing snapshot for route {route_id}"))?;
    info!(duration_in_traffic_s = tt.duration_in_traffic_s, "Snapshot ingested");
    Ok(Some(record))
}

/// What happened to one route in a cycle.
#[derive(Debug, Clone, Serialize)]
pub struct RouteOutcome {
    pub route_id: String,
    pub predictions_written: usize,
    pub schedule: Option<ScheduleLayout>,
    pub error: Option<String>,
}

impl RouteOutcome {
    fn failed(route_id: &str, error: String) -> Self {
        Self {
            route_id: route_id.to_string(),
            predictions_written: 0,
            schedule: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub routes: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub snapshots_written: usize,
    pub outcomes: Vec<RouteOutcome>,
}

/// The full per-cycle pipeline with its collaborators injected.
#[derive(Clone)]
pub struct Pipeline {
    source: SignalSource,
    repo: Arc<dyn Repository>,
    lookup: Option<Arc<dyn TravelTimeLookup>>,
    forecaster: Forecaster,
    config: CycleConfig,
}

impl Pipeline {
    pub fn new(source: SignalSource, repo: Arc<dyn Repository>, forecaster: Forecaster, config: CycleConfig) -> Self {
        Self {
            source,
            repo,
            lookup: None,
            forecaster,
            config,
        }
    }

    /// Enables the snapshot step. Without a lookup, snapshots are skipped.
    pub fn with_lookup(mut self, lookup: Arc<dyn TravelTimeLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn config(&self) -> &CycleConfig {
        &self.config
    }

    async fn read_tables(&self) -> Result<Arc<SignalTables>> {
        let source = self.source.clone();
        let tables = tokio::task::spawn_blocking(move || source.read())
            .await
            .context("signal loader task panicked")??;
        Ok(Arc::new(tables))
    }

    /// Runs one cycle stamped `now`.
    ///
    /// # Errors
    ///
    /// Only when the signal sources themselves cannot be read; per-route
    /// failures are reported in the returned [`CycleReport`].
    #[tracing::instrument(skip(self), fields(window = self.config.window_minutes, buses = self.config.num_buses))]
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let tables = self.read_tables().await?;
        let route_ids = tables.route_ids();
        info!(routes = route_ids.len(), "Starting scheduling cycle");

        let snapshots_written = self.snapshot_routes(&route_ids, now).await;
        let outcomes = self.plan_routes(tables, &route_ids, now).await;

        let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
        let report = CycleReport {
            started_at: now,
            routes: route_ids.len(),
            succeeded: outcomes.len() - failed,
            failed,
            snapshots_written,
            outcomes,
        };

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            snapshots = report.snapshots_written,
            "Scheduling cycle finished"
        );
        Ok(report)
    }

    /// Looks up and appends a travel-time snapshot for every route that has
    /// an origin/destination mapping. Routes without one, or whose lookup
    /// comes back empty, are skipped.
    async fn snapshot_routes(&self, route_ids: &[String], now: DateTime<Utc>) -> usize {
        let Some(lookup) = &self.lookup else {
            debug!("No travel-time lookup configured, skipping snapshots");
            return 0;
        };

        let mut written = 0;
        for route_id in route_ids {
            let mapping = match self.repo.latest_route_mapping(route_id).await {
                Ok(Some(m)) if !m.origin.is_empty() && !m.destination.is_empty() => m,
                Ok(_) => continue,
                Err(e) => {
                    warn!(route_id = %route_id, error = %e, "Failed to read route mapping");
                    continue;
                }
            };

            let Some(tt) = lookup.lookup(&mapping.origin, &mapping.destination).await else {
                warn!(route_id = %route_id, "No travel time available, skipping snapshot");
                continue;
            };

            match self.repo.put_snapshot(&snapshot_record(route_id, now, &tt)).await {
                Ok(()) => written += 1,
                Err(e) => error!(route_id = %route_id, error = %e, "Failed to write snapshot"),
            }
        }
        written
    }

    async fn plan_routes(&self, tables: Arc<SignalTables>, route_ids: &[String], now: DateTime<Utc>) -> Vec<RouteOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut tasks = Vec::with_capacity(route_ids.len());

        for requested in route_ids {
            let sem = semaphore.clone();
            let tables = tables.clone();
            let repo = self.repo.clone();
            let forecaster = self.forecaster.clone();
            let config = self.config;
            let route_id = requested.clone();

            let span = tracing::info_span!("route", route_id = %route_id);

            let task = tokio::spawn(
                async move {
                    let _permit = match sem.acquire_owned().await {
                        Ok(p) => p,
                        Err(e) => return RouteOutcome::failed(&route_id, e.to_string()),
                    };

                    let rid = route_id.clone();
                    let planned = tokio::task::spawn_blocking(move || {
                        plan_route(&forecaster, &tables, &rid, now, config.window_minutes, config.num_buses)
                    })
                    .await;

                    let plan = match planned {
                        Ok(Ok(plan)) => plan,
                        Ok(Err(e)) => {
                            error!(error = %e, "Route forecast failed");
                            return RouteOutcome::failed(&route_id, e.to_string());
                        }
                        Err(e) => {
                            error!(error = %e, "Route forecast task panicked");
                            return RouteOutcome::failed(&route_id, e.to_string());
                        }
                    };

                    match persist_plan(repo.as_ref(), &plan).await {
                        Ok(written) => {
                            info!(predictions = written, fitness = plan.layout.fitness, "Route planned");
                            RouteOutcome {
                                route_id: plan.forecast.route_id.clone(),
                                predictions_written: written,
                                schedule: Some(plan.layout),
                                error: None,
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to persist route plan");
                            RouteOutcome::failed(&route_id, format!("{e:#}"))
                        }
                    }
                }
                .instrument(span),
            );

            tasks.push((requested.clone(), task));
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        for (route_id, task) in tasks {
            match task.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => outcomes.push(RouteOutcome::failed(&route_id, e.to_string())),
            }
        }
        outcomes
    }
}
