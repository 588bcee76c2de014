//! Remote-debugging protocol client
//!
//! JSON messages over a WebSocket: requests carry an `id` that the renderer
//! echoes back in its response, everything without an `id` is an event.
//! Each automation run opens its own connection and its own isolated
//! browser context on the shared renderer process.

mod connection;
mod page;

#[cfg(test)]
pub mod testing;

pub use connection::{CdpConnection, CdpSession, discover};
pub use page::IsolatedPage;

use thiserror::Error;

pub type CdpResult<T> = Result<T, CdpError>;

#[derive(Debug, Error)]
pub enum CdpError {
    #[error("failed to discover debugging endpoint: {0}")]
    Discovery(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid protocol message: {0}")]
    Json(#[from] serde_json::Error),

    /// The renderer answered with an error object
    #[error("{method} failed ({code}): {message}")]
    Protocol {
        method: String,
        code: i64,
        message: String,
    },

    #[error("connection to renderer closed")]
    Closed,

    /// The renderer did not answer within the allotted time
    #[error("{0} timed out")]
    Timeout(String),
}

impl CdpError {
    /// True when the connection itself is gone, as opposed to a single call failing
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::Closed | Self::WebSocket(_))
    }
}
