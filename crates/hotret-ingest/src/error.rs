//! Error types for the ingest pipeline
//!
//! Only genuine faults are errors. A line that cannot be classified or a file
//! whose load is rolled back is an outcome value, see
//! [`LineOutcome`](crate::decoder::LineOutcome) and
//! [`FileOutcome`](crate::router::FileOutcome).

use thiserror::Error;

/// Result type for ingest operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid SQL identifier {0:?}")]
    InvalidIdentifier(String),

    #[error("Table `{table}` has no column(s) named {}", columns.join(", "))]
    UnknownColumns { table: String, columns: Vec<String> },

    #[error("Table `{0}` does not exist or has no columns")]
    MissingTable(String),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Processing cancelled: {0}")]
    Cancelled(String),

    /// Failure reported by a store backend that is not SQL based
    #[error("Store error: {0}")]
    Store(String),
}

impl From<hotret_common::CommonError> for IngestError {
    fn from(err: hotret_common::CommonError) -> Self {
        IngestError::Config(err.to_string())
    }
}
