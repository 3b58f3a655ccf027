use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("extraction from '{location}' failed: {message}")]
    Extraction { location: String, message: String },

    #[error("batch validation failed: {0}")]
    Validation(String),

    #[error("load into {store} store failed after {written} records written: {message}")]
    Load {
        store: String,
        written: usize,
        message: String,
    },

    #[error("analytics data unavailable: {0}")]
    Analytics(String),

    #[error("report generation failed: {0}")]
    Report(String),

    #[error("report artifact {} already exists with different content", .0.display())]
    ReportExists(PathBuf),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("staged artifact '{key}' not found for run {run_id}")]
    StagingMissing { run_id: String, key: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("DAG error: {0}")]
    Dag(String),

    #[error("step '{step}' timed out after {seconds}s")]
    Timeout { step: String, seconds: u64 },

    #[error("illegal run state transition: {0}")]
    StateTransition(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV parsing failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("template rendering failed: {0}")]
    Template(#[from] askama::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EtlError {
    pub fn extraction(location: impl Into<String>, message: impl ToString) -> Self {
        EtlError::Extraction {
            location: location.into(),
            message: message.to_string(),
        }
    }

    pub fn load(store: &str, written: usize, message: impl ToString) -> Self {
        EtlError::Load {
            store: store.to_string(),
            written,
            message: message.to_string(),
        }
    }

    /// Short, stable label used for metrics and step summaries
    pub fn kind(&self) -> &'static str {
        match self {
            EtlError::Extraction { .. } => "extraction",
            EtlError::Validation(_) => "validation",
            EtlError::Load { .. } => "load",
            EtlError::Analytics(_) => "analytics",
            EtlError::Report(_) | EtlError::ReportExists(_) | EtlError::Template(_) => "report",
            EtlError::Storage(_) | EtlError::Database(_) => "storage",
            EtlError::StagingMissing { .. } => "staging",
            EtlError::Config(_) | EtlError::Toml(_) => "config",
            EtlError::Dag(_) | EtlError::StateTransition(_) => "dag",
            EtlError::Timeout { .. } => "timeout",
            EtlError::Http(_) => "http",
            EtlError::Json(_) => "json",
            EtlError::Csv(_) => "csv",
            EtlError::Io(_) => "io",
        }
    }

    /// False when another attempt would fail the same way
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            EtlError::Validation(_)
                | EtlError::Config(_)
                | EtlError::Toml(_)
                | EtlError::ReportExists(_)
                | EtlError::StagingMissing { .. }
                | EtlError::Dag(_)
                | EtlError::StateTransition(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
