//! Error types for the OTSR system

use thiserror::Error;

/// Main error type for OTSR operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error: unrecognized option value or inconsistent
    /// settings. Always fatal at construction time, never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tensor operation error. Numerical failures (NaN/Inf losses) and
    /// device memory exhaustion surface through this variant and propagate
    /// to the caller untouched.
    #[error("Tensor operation error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Checkpoint load/save error
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("Serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Other errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for OTSR operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a checkpoint error
    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}
