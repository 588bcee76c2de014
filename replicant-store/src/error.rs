//! Error types for the transaction store

use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// No transaction is stored under the given name
    #[error("transaction not found: {0}")]
    NotFound(String),

    /// The store URI is malformed or names an unknown backend
    #[error("invalid store URI '{0}'")]
    InvalidUri(String),

    /// Stored configs are kept as JSON
    #[error("failed to encode or decode transaction: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(#[from] sled::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
