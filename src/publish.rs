//! Uploads the latest schedules, and optionally the raw tables, to S3.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use std::io::Write;
use tracing::{debug, info, warn};

use crate::store::{CsvRepository, Repository, ScheduleRecord, Table};

pub const INDEX_KEY: &str = "schedules.json";

/// Destination for published objects.
#[async_trait]
pub trait ObjectSink: Send + Sync {
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()>;
}

/// An S3 bucket as an [`ObjectSink`].
#[derive(Clone)]
pub struct S3Sink {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Sink {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Client configured from the standard AWS environment and profile chain.
    pub async fn from_env(bucket: impl Into<String>) -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(aws_sdk_s3::Client::new(&config), bucket)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectSink for S3Sink {
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .with_context(|| format!("uploading s3://{}/{}", self.bucket, key))?;
        Ok(())
    }
}

/// Serializes a value to JSON and uploads it with `application/json` content type.
pub async fn write_json(sink: &dyn ObjectSink, key: &str, value: &impl Serialize) -> Result<()> {
    let body = serde_json::to_vec(value)?;
    sink.put_object(key, body, "application/json").await
}

/// A route's latest schedule as published.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedSchedule {
    pub route_id: String,
    pub generated_at: DateTime<Utc>,
    pub departures_minutes: Vec<u32>,
    pub fitness: f64,
}

impl From<ScheduleRecord> for PublishedSchedule {
    fn from(r: ScheduleRecord) -> Self {
        Self {
            route_id: r.route_id,
            generated_at: r.timestamp,
            departures_minutes: r.departures_minutes,
            fitness: r.fitness,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleIndexEntry {
    pub route_id: String,
    pub generated_at: DateTime<Utc>,
    pub key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleIndex {
    pub published_at: DateTime<Utc>,
    pub routes: Vec<ScheduleIndexEntry>,
}

pub fn schedule_key(route_id: &str) -> String {
    format!("schedules/{route_id}.json")
}

pub fn archive_key(table: Table, route_id: &str, gzip: bool) -> String {
    let base = format!("{}/route_id={}.csv", table.dir_name(), route_id);
    if gzip { format!("{base}.gz") } else { base }
}

pub fn gzip_bytes(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Uploads every route's latest schedule, then the index of what was
/// uploaded. A route that fails to upload is left out of the index.
#[tracing::instrument(skip_all, fields(store = %repo.root().display()))]
pub async fn publish_schedules(
    sink: &dyn ObjectSink,
    repo: &CsvRepository,
    now: DateTime<Utc>,
) -> Result<ScheduleIndex> {
    let mut routes = Vec::new();

    for route_id in repo.routes_in(Table::Schedules)? {
        let Some(record) = repo.latest_schedule(&route_id).await? else {
            debug!(route_id = %route_id, "Schedule table is empty");
            continue;
        };

        let published = PublishedSchedule::from(record);
        let key = schedule_key(&published.route_id);
        match write_json(sink, &key, &published).await {
            Ok(()) => routes.push(ScheduleIndexEntry {
                route_id: published.route_id,
                generated_at: published.generated_at,
                key,
            }),
            Err(e) => warn!(route_id = %route_id, error = %e, "Failed to publish schedule"),
        }
    }

    let index = ScheduleIndex {
        published_at: now,
        routes,
    };
    write_json(sink, INDEX_KEY, &index).await?;

    info!(routes = index.routes.len(), "Schedules published");
    Ok(index)
}

/// Uploads every table CSV, gzip-compressed when `gzip` is set.
#[tracing::instrument(skip(sink, repo), fields(store = %repo.root().display()))]
pub async fn archive_tables(sink: &dyn ObjectSink, repo: &CsvRepository, gzip: bool) -> Result<usize> {
    let mut uploaded = 0;

    for table in Table::ALL {
        for route_id in repo.routes_in(table)? {
            let path = repo.table_path(table, &route_id);
            let contents = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;

            let (body, content_type) = if gzip {
                (gzip_bytes(&contents)?, "application/gzip")
            } else {
                (contents, "text/csv")
            };

            sink.put_object(&archive_key(table, &route_id, gzip), body, content_type)
                .await?;
            uploaded += 1;
        }
    }

    info!(uploaded, gzip, "Tables archived");
    Ok(uploaded)
}
