//! Transaction error taxonomy

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured failure detail carried by a failed `TransactionResult`
///
/// Serialized as `{"kind": "...", "message": "..."}` so that consumers of the
/// result JSON can branch on the kind without parsing text.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum TransactionError {
    /// Invalid timeout, unknown driver, malformed script or steps, template failure
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The transaction ran and failed
    #[error("execution error: {0}")]
    Execution(String),

    /// The overall deadline elapsed
    #[error("timeout: {0}")]
    Timeout(String),

    /// The run was cancelled before its deadline
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A run for the same identity is already in flight
    #[error("busy: {0}")]
    Busy(String),

    /// Renderer or connection failure underneath a driver
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl TransactionError {
    /// Short machine-readable kind, matching the serialized `kind` field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Execution(_) => "execution",
            Self::Timeout(_) => "timeout",
            Self::Cancelled(_) => "cancelled",
            Self::Busy(_) => "busy",
            Self::Infrastructure(_) => "infrastructure",
        }
    }

    /// Message without the kind prefix
    pub fn message(&self) -> &str {
        match self {
            Self::Configuration(msg)
            | Self::Execution(msg)
            | Self::Timeout(msg)
            | Self::Cancelled(msg)
            | Self::Busy(msg)
            | Self::Infrastructure(msg) => msg,
        }
    }

    /// Whether the executor may start another attempt after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Execution(_) | Self::Infrastructure(_))
    }
}
