//! Error types for Timekeeper

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Store used before `initialize()` completed
    #[error("Session store not initialized")]
    NotInitialized,

    /// Caller passed an argument the operation cannot accept
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Storage backend failure that is not a SQLite error
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result type alias for Core operations
pub type Result<T> = std::result::Result<T, CoreError>;

impl From<tokio::task::JoinError> for CoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        CoreError::Storage(format!("blocking task failed: {}", e))
    }
}
