//! Error types shared across the RenoTimeline crates.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RenoError>;

#[derive(Debug, Error)]
pub enum RenoError {
    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A workflow definition's trigger_config cannot be interpreted.
    #[error("invalid trigger config: {0}")]
    InvalidTrigger(String),

    /// A stored action carries a type tag this build does not implement.
    /// Unknown actions fail loudly rather than being silently skipped.
    #[error("unsupported action type: {0}")]
    UnsupportedAction(String),

    /// A single workflow action could not be performed.
    #[error("action failed: {0}")]
    Action(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
