//! Error types shared across the backfill workspace

use thiserror::Error;

/// Result type alias for backfill operations
pub type Result<T> = std::result::Result<T, BackfillError>;

/// Main error type for backfill jobs
#[derive(Error, Debug)]
pub enum BackfillError {
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BackfillError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
