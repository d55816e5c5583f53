//! Limnus Core crate - configuration, error type, and crash-safe document
//! persistence shared by the ledger and the vector index.

pub mod config;
pub mod document;
pub mod error;

pub use config::LimnusConfig;
pub use document::{CorruptPolicy, JsonDocument};
pub use error::{LimnusError, Result};
