use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for the Limnus memory core.
///
/// Not-found conditions (deleting an absent entry, skipping a malformed
/// import record) are never errors; they are silent no-ops at the call site.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LimnusError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt document at {path}: {reason}")]
    CorruptDocument { path: PathBuf, reason: String },

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Ledger error: {0}")]
    Ledger(String),
}

impl From<toml::de::Error> for LimnusError {
    fn from(err: toml::de::Error) -> Self {
        LimnusError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for LimnusError {
    fn from(err: toml::ser::Error) -> Self {
        LimnusError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for LimnusError {
    fn from(err: serde_json::Error) -> Self {
        LimnusError::Serialization(err.to_string())
    }
}

impl From<tempfile::PersistError> for LimnusError {
    fn from(err: tempfile::PersistError) -> Self {
        LimnusError::Io(err.error)
    }
}

/// A specialized `Result` type for Limnus operations.
pub type Result<T> = std::result::Result<T, LimnusError>;
