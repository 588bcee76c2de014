//! Renderer process management
//!
//! One headless browser process backs every automation run. The manager
//! starts it, health-checks it and periodically swaps it for a fresh one
//! without disturbing runs that are still using the old process.

mod chrome;
mod manager;

#[cfg(test)]
pub mod testing;

pub use chrome::ChromeLauncher;
pub use manager::{RendererManager, RendererSettings};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("failed to launch renderer generation {generation}: {reason}")]
    Launch { generation: u64, reason: String },

    #[error("renderer generation {generation} did not become healthy after {attempts} attempts")]
    Unhealthy { generation: u64, attempts: u32 },

    #[error("renderer health check failed: {0}")]
    HealthCheck(String),

    #[error("no renderer is available")]
    Unavailable,
}

/// Starts renderer processes
#[async_trait]
pub trait RendererLauncher: Send + Sync {
    /// Launches the process for `generation` in port slot `slot` (0 or 1)
    ///
    /// Two generations are alive at once during a recycle. The manager always
    /// hands the incoming generation the slot the live one is not using, so a
    /// launcher must derive the debugging port from the slot, never from the
    /// generation.
    async fn launch(
        &self,
        generation: u64,
        slot: usize,
    ) -> Result<Box<dyn RendererProcess>, RendererError>;
}

/// A running renderer process
#[async_trait]
pub trait RendererProcess: Send + Sync {
    /// Debugging endpoint, `http://host:port`
    fn endpoint(&self) -> &str;

    async fn health_check(&self) -> Result<(), RendererError>;

    /// Stops the process forcefully and releases its resources
    async fn terminate(&self);
}
