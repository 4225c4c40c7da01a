//! Error types for the registry state machine

use thiserror::Error;

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Registry errors
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input (bad WRN, missing attribute, non-positive amount)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Signer is not allowed to perform the action
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Record, bond, auction or authority absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// State conflict (already reserved, already associated)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Bond balance or account balance shortfall
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Encoding or hashing failure
    #[error("Internal error: {0}")]
    Internal(String),

    /// Storage error (key-value substrate)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invariant violation (negative bond balance, dangling bond reference)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error classification surfaced to transaction submitters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorKind {
    /// Malformed input
    InvalidInput = 1,
    /// Authorization failure
    Unauthorized = 2,
    /// Missing entity
    NotFound = 3,
    /// Conflicting state
    Conflict = 4,
    /// Funds shortfall
    InsufficientFunds = 5,
    /// Non-recoverable bug
    Internal = 6,
}

impl ErrorKind {
    /// Stable numeric code (0 is reserved for success)
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Short label used in logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::Internal => "internal",
        }
    }
}

impl Error {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::InsufficientFunds(_) => ErrorKind::InsufficientFunds,
            _ => ErrorKind::Internal,
        }
    }

    /// Whether this error must halt the chain rather than fail a transaction
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::InvariantViolation(_))
    }
}

#[cfg(feature = "rocksdb")]
impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
