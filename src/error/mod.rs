//! Error handling for the ledger
//!
//! One error type for every operation in the crate. Validation failures carry
//! the specific rule that was broken (see [`ValidationError`]); everything else
//! carries enough context (hash, height, peer) to diagnose without re-deriving
//! chain state.

use crate::core::ValidationError;
use thiserror::Error;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, BlockchainError>;

#[derive(Debug, Clone, Error)]
pub enum BlockchainError {
    /// A transaction, header or block broke a consensus rule
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),
    /// A storage entry does not exist (distinct so callers can detect an
    /// uninitialized chain)
    #[error("Not found: {0}")]
    NotFound(String),
    /// Internal invariant violated after validation already passed
    #[error("Consistency fault: {0}")]
    Consistency(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    /// Mining or sync aborted through a cancellation token
    #[error("Cancelled: {0}")]
    Cancelled(String),
    #[error("Cryptographic error: {0}")]
    Crypto(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Mining error: {0}")]
    Mining(String),
}

impl BlockchainError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlockchainError::NotFound(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BlockchainError::Cancelled(_))
    }
}

impl From<std::io::Error> for BlockchainError {
    fn from(err: std::io::Error) -> Self {
        BlockchainError::Io(err.to_string())
    }
}

impl From<sled::Error> for BlockchainError {
    fn from(err: sled::Error) -> Self {
        BlockchainError::Database(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for BlockchainError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for BlockchainError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for BlockchainError {
    fn from(err: toml::de::Error) -> Self {
        BlockchainError::Config(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for BlockchainError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        BlockchainError::Consistency(format!("lock poisoned: {err}"))
    }
}
