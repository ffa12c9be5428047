//! Error types shared across the workspace

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Environment variable {name} is missing")]
    MissingEnv { name: String },

    #[error("Environment variable {name} has an invalid value {value:?}: {reason}")]
    InvalidEnv {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl CommonError {
    pub fn missing_env(name: &str) -> Self {
        Self::MissingEnv {
            name: name.to_string(),
        }
    }

    pub fn invalid_env(name: &str, value: &str, reason: impl std::fmt::Display) -> Self {
        Self::InvalidEnv {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}
