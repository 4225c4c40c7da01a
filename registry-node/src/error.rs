//! Error types for the registry node

use thiserror::Error;

/// Result type for node operations
pub type Result<T> = std::result::Result<T, Error>;

/// Node errors
#[derive(Error, Debug)]
pub enum Error {
    /// State machine error
    #[error("Registry error: {0}")]
    Registry(#[from] registry_core::Error),

    /// Malformed block feed line
    #[error("Block feed line {line}: {message}")]
    Feed {
        /// 1-based line number
        line: usize,
        /// What was wrong
        message: String,
    },

    /// Genesis does not match the stored chain
    #[error("Genesis error: {0}")]
    Genesis(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Must the node stop rather than continue replaying
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Registry(inner) => inner.is_fatal(),
            _ => true,
        }
    }
}
