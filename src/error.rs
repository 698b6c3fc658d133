use thiserror::Error;

#[derive(Error, Debug)]
pub enum TabulaError {
    /// Bad or missing caller input. Reported synchronously, never recorded on a job.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Job queue is full ({max} jobs queued or running)")]
    QueueFull { max: usize },

    #[error("Ingestion failed: {0}")]
    Ingestion(String),

    /// A best-effort step failed. Callers log these and continue.
    #[error("Optional step '{step}' failed: {message}")]
    OptionalStep { step: &'static str, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),
}

impl TabulaError {
    pub fn optional(step: &'static str, err: impl std::fmt::Display) -> Self {
        Self::OptionalStep {
            step,
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TabulaError>;
