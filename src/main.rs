//! CLI entry point for the transit delay planner.
//!
//! Provides subcommands for inspecting route signals, forecasting delays,
//! laying out departures, running the scheduling cycle once or on a cadence,
//! and publishing schedules to S3.

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::LevelFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use transit_delay_planner::{
    config::{RouteMappingFile, Settings},
    forecast::Forecaster,
    lookup::{DirectionsClient, TravelTimeLookup},
    output::print_json,
    pipeline::{CycleConfig, Pipeline, ingest_snapshot, persist_plan, plan_route},
    publish::{S3Sink, archive_tables, publish_schedules},
    scheduler::CadenceScheduler,
    signals::SignalSource,
    store::{CsvRepository, Repository, RouteMappingRecord},
};

const HISTORY_ROWS: usize = 60;

#[derive(Parser)]
#[command(name = "transit_delay_planner")]
#[command(about = "Forecast route delays and lay out bus departures", long_about = None)]
struct Cli {
    /// Directory with the boarding/landing/loader CSVs (overrides DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Root directory of the CSV tables (overrides STORE_DIR)
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List route ids found in the boarding data
    Routes,
    /// Show the most recent merged boarding/landing/loader rows for a route
    History {
        #[arg(short, long)]
        route: String,
    },
    /// Forecast per-minute delays for a route starting now
    Forecast {
        #[arg(short, long)]
        route: String,

        /// Minutes to forecast (defaults to WINDOW_MINUTES)
        #[arg(short, long)]
        window: Option<u32>,
    },
    /// Show stored predictions for a route, newest first
    Predictions {
        #[arg(short, long)]
        route: String,

        #[arg(short, long, default_value_t = 120)]
        limit: usize,
    },
    /// Show the latest stored schedule, or plan a fresh one
    Schedule {
        #[arg(short, long)]
        route: String,

        /// Forecast and lay out a new schedule instead of reading the store
        #[arg(long, default_value_t = false)]
        fresh: bool,

        /// Persist the fresh plan's predictions and schedule
        #[arg(long, default_value_t = false, requires = "fresh")]
        save: bool,

        #[arg(short, long)]
        buses: Option<usize>,

        #[arg(short, long)]
        window: Option<u32>,
    },
    /// Look up the current travel time between two places
    Eta {
        #[arg(long)]
        origin: String,

        #[arg(long)]
        destination: String,
    },
    /// Look up a route's travel time now and store it as a snapshot
    Ingest {
        #[arg(short, long)]
        route: String,

        #[arg(long)]
        origin: String,

        #[arg(long)]
        destination: String,
    },
    /// Show the current origin/destination mapping for a route
    Mapping {
        #[arg(short, long)]
        route: String,
    },
    /// Record origin/destination mappings from a JSON file {route_id: [origin, destination]}
    PushRoutes {
        #[arg(value_name = "FILE")]
        file: String,
    },
    /// Run one scheduling cycle across all routes
    RunCycle,
    /// Run the scheduling cycle on a cadence until Ctrl+C
    Serve {
        /// Seconds between cycles (overrides CYCLE_INTERVAL_SECS)
        #[arg(short, long)]
        interval: Option<u64>,
    },
    /// Upload latest schedules and an index to S3
    Publish {
        /// S3 bucket name (e.g., "my-bucket")
        #[arg(long)]
        s3_bucket: String,

        /// Also upload every table CSV
        #[arg(long, default_value_t = false)]
        archive: bool,

        /// Gzip compress archived CSVs before uploading
        #[arg(long, default_value_t = false, requires = "archive")]
        gzip: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/transit_delay_planner.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("transit_delay_planner.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("RUST_LOG")
                .from_env_lossy(),
        );

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::DEBUG.into())
                .with_env_var("RUST_LOG_JSON")
                .from_env_lossy(),
        );

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    let mut settings = Settings::from_env()?;
    if let Some(dir) = cli.data_dir {
        settings.data_dir = dir;
    }
    if let Some(dir) = cli.store_dir {
        settings.store_dir = dir;
    }

    let source = SignalSource::new(&settings.data_dir);
    let repo = CsvRepository::new(&settings.store_dir);
    let forecaster = Forecaster::new(settings.forest.clone());

    match cli.command {
        Commands::Routes => {
            let tables = source.read()?;
            print_json(&json!({ "routes": tables.route_ids() }))?;
        }
        Commands::History { route } => {
            let frame = source.load_route(&route)?;
            if frame.route_id != route {
                warn!(requested = %route, resolved = %frame.route_id, "Showing fallback route");
            }
            print_json(&json!({
                "route_id": frame.route_id,
                "passenger_data": frame.tail(HISTORY_ROWS),
            }))?;
        }
        Commands::Forecast { route, window } => {
            let tables = source.read()?;
            let horizon = window.unwrap_or(settings.window_minutes) as usize;
            let forecast = forecaster.forecast(&tables, &route, Utc::now(), horizon)?;
            print_json(&forecast.entries())?;
        }
        Commands::Predictions { route, limit } => {
            let rows = repo.predictions_by_route(&route, limit).await?;
            print_json(&json!({ "route_id": route, "predictions": rows }))?;
        }
        Commands::Schedule {
            route,
            fresh,
            save,
            buses,
            window,
        } => {
            if fresh {
                let tables = source.read()?;
                let plan = plan_route(
                    &forecaster,
                    &tables,
                    &route,
                    Utc::now(),
                    window.unwrap_or(settings.window_minutes),
                    buses.unwrap_or(settings.num_buses),
                )?;
                if save {
                    let written = persist_plan(&repo, &plan).await?;
                    info!(route_id = %plan.forecast.route_id, predictions = written, "Plan saved");
                }
                print_json(&json!({
                    "route_id": plan.forecast.route_id,
                    "departures_minutes": plan.layout.departures_minutes,
                    "fitness": plan.layout.fitness,
                }))?;
            } else {
                let record = repo
                    .latest_schedule(&route)
                    .await?
                    .ok_or_else(|| anyhow!("no schedule stored for route {route}"))?;
                print_json(&json!({
                    "route_id": record.route_id,
                    "timestamp": record.timestamp,
                    "departures_minutes": record.departures_minutes,
                    "fitness": record.fitness,
                }))?;
            }
        }
        Commands::Eta {
            origin,
            destination,
        } => {
            let client = directions_client(&settings)?
                .ok_or_else(|| anyhow!("GOOGLE_MAPS_API_KEY must be set"))?;
            let tt = client
                .lookup(&origin, &destination)
                .await
                .ok_or_else(|| anyhow!("no route found between '{origin}' and '{destination}'"))?;
            print_json(&json!({
                "origin": origin,
                "destination": destination,
                "distance_m": tt.distance_m,
                "duration_s": tt.duration_s,
                "duration_in_traffic_s": tt.duration_in_traffic_s,
            }))?;
        }
        Commands::Ingest {
            route,
            origin,
            destination,
        } => {
            let client = directions_client(&settings)?
                .ok_or_else(|| anyhow!("GOOGLE_MAPS_API_KEY must be set"))?;
            match ingest_snapshot(&repo, &client, &route, &origin, &destination, Utc::now()).await? {
                Some(snapshot) => print_json(&json!({ "ok": true, "snapshot": snapshot }))?,
                None => print_json(&json!({ "ok": false, "error": "no travel time available" }))?,
            }
        }
        Commands::Mapping { route } => {
            let mapping = repo
                .latest_route_mapping(&route)
                .await?
                .ok_or_else(|| anyhow!("no mapping found for route {route}"))?;
            print_json(&mapping)?;
        }
        Commands::PushRoutes { file } => {
            let mapping = RouteMappingFile::load(&file)?;
            let now = Utc::now();
            for (route_id, origin, destination) in mapping.iter() {
                repo.append_history(&RouteMappingRecord {
                    route_id: route_id.to_string(),
                    timestamp: now,
                    origin: origin.to_string(),
                    destination: destination.to_string(),
                })
                .await?;
            }
            info!(count = mapping.len(), "Route mappings recorded");
            print_json(&json!({ "ok": true, "count": mapping.len() }))?;
        }
        Commands::RunCycle => {
            let pipeline = build_pipeline(&settings, source, repo, forecaster)?;
            let report = pipeline.run_cycle(Utc::now()).await?;
            print_json(&report)?;
        }
        Commands::Serve { interval } => {
            if !settings.enable_scheduler {
                info!("ENABLE_SCHEDULER is off, not starting the scheduler");
                return Ok(());
            }
            let period = interval
                .map(std::time::Duration::from_secs)
                .unwrap_or(settings.cycle_interval);

            let pipeline = build_pipeline(&settings, source, repo, forecaster)?;
            let scheduler = CadenceScheduler::new(Arc::new(pipeline), period);
            let handle = scheduler.start()?;
            info!(interval_secs = period.as_secs(), "Scheduling cycles. Press Ctrl+C to stop.");

            tokio::signal::ctrl_c()
                .await
                .context("waiting for Ctrl+C")?;
            info!(ticks = handle.ticks(), "Shutting down");
            handle.stop().await?;
        }
        Commands::Publish {
            s3_bucket,
            archive,
            gzip,
        } => {
            if s3_bucket.is_empty() {
                bail!("--s3-bucket must not be empty");
            }
            let sink = S3Sink::from_env(&s3_bucket).await;
            info!(bucket = %sink.bucket(), archive, gzip, "Publishing to S3");

            let index = publish_schedules(&sink, &repo, Utc::now()).await?;
            let archived = if archive {
                archive_tables(&sink, &repo, gzip).await?
            } else {
                0
            };
            print_json(&json!({
                "bucket": s3_bucket,
                "schedules": index.routes.len(),
                "archived_tables": archived,
            }))?;
        }
    }

    Ok(())
}

fn directions_client(settings: &Settings) -> Result<Option<impl TravelTimeLookup + 'static>> {
    settings
        .google_maps_api_key
        .as_deref()
        .map(DirectionsClient::google)
        .transpose()
}

fn build_pipeline(
    settings: &Settings,
    source: SignalSource,
    repo: CsvRepository,
    forecaster: Forecaster,
) -> Result<Pipeline> {
    let config = CycleConfig {
        window_minutes: settings.window_minutes,
        num_buses: settings.num_buses,
        workers: settings.workers,
    };
    let pipeline = Pipeline::new(source, Arc::new(repo), forecaster, config);

    match directions_client(settings)? {
        Some(client) => Ok(pipeline.with_lookup(Arc::new(client))),
        None => {
            warn!("GOOGLE_MAPS_API_KEY not set, travel-time snapshots disabled");
            Ok(pipeline)
        }
    }
}
