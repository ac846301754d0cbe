//! Error types for the prediction and scheduling core.

use std::path::PathBuf;

/// Failures surfaced by the loader, feature builder, forecaster and layout.
#[derive(thiserror::Error, Debug)]
pub enum PlannerError {
    /// A required dataset is missing entirely. Not retried.
    #[error("data not found: {0}")]
    DataNotFound(String),
    #[error("malformed data in '{path}': {message}")]
    MalformedData { path: PathBuf, message: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("model error: {0}")]
    Model(String),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PlannerError>;
