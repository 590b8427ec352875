//! Error types for artigen-core

use thiserror::Error;

/// Core library error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("No active module")]
    NoActiveModule,

    /// A history or send operation whose preconditions are not met.
    #[error("{0}")]
    Refused(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Result type alias using Error.
pub type Result<T> = std::result::Result<T, Error>;
