//! Error types for the Tollbooth service.

use thiserror::Error;

/// Main error type for Tollbooth operations.
#[derive(Error, Debug)]
pub enum TollboothError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Job queue errors
    #[error("Job queue error: {0}")]
    Queue(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for TollboothError {
    fn from(err: ::config::ConfigError) -> Self {
        TollboothError::Config(err.to_string())
    }
}

/// Result type alias for Tollbooth operations.
pub type Result<T> = std::result::Result<T, TollboothError>;
