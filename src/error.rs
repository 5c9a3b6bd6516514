// ⚠️ Pipeline errors
// Source failures are isolated per year; data-quality gaps are NOT errors
// (they travel as MappingStatus::NoCandidateMatched and Option<f64>::None).

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Source unavailable for {statement} {year} ({path}): {reason}")]
    SourceUnavailable {
        year: i32,
        statement: String,
        path: PathBuf,
        reason: String,
    },

    #[error("Malformed source {path} at line {line}: {reason}")]
    MalformedSource {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Duplicate current-period row for {company} / {year} / {metric}")]
    DuplicateMetricRow {
        company: String,
        year: i32,
        metric: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl PipelineError {
    /// Errors that abort a single year's contribution, not the whole run
    pub fn is_year_scoped(&self) -> bool {
        matches!(
            self,
            PipelineError::SourceUnavailable { .. }
                | PipelineError::MalformedSource { .. }
                | PipelineError::DuplicateMetricRow { .. }
        )
    }

    /// Stable name used in audit tables
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::SourceUnavailable { .. } => "SourceUnavailable",
            PipelineError::MalformedSource { .. } => "MalformedSource",
            PipelineError::DuplicateMetricRow { .. } => "DuplicateMetricRow",
            PipelineError::InvalidConfig(_) => "InvalidConfig",
            PipelineError::Io(_) => "Io",
            PipelineError::Csv(_) => "Csv",
            PipelineError::Json(_) => "Json",
            PipelineError::Database(_) => "Database",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
