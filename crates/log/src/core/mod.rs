//! Error types

use thiserror::Error;

/// Errors raised while installing the logger
#[derive(Debug, Error)]
pub enum LogError {
    /// Filter directive could not be parsed
    #[error("invalid log filter: {0}")]
    Filter(String),

    /// A global subscriber is already installed
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Result type for logger operations
pub type LogResult<T> = Result<T, LogError>;
