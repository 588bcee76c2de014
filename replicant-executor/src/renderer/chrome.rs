//! Headless Chrome launcher

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{RendererError, RendererLauncher, RendererProcess};

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);
const EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Launches a headless Chrome (or headless-shell) binary
///
/// The debugging port is `base_port` or `base_port + 1` depending on the slot
/// the manager assigns, so an outgoing and an incoming generation never
/// collide. Every generation gets its own profile directory.
pub struct ChromeLauncher {
    binary: String,
    args: Vec<String>,
    base_port: u16,
    data_root: PathBuf,
    client: reqwest::Client,
}

impl ChromeLauncher {
    /// # Arguments
    /// * `binary` - Path to the browser binary
    /// * `args` - Fixed argument set, without port and profile flags
    /// * `base_port` - First of the two debugging ports
    pub fn new(binary: String, args: Vec<String>, base_port: u16, client: reqwest::Client) -> Self {
        Self {
            binary,
            args,
            base_port,
            data_root: std::env::temp_dir().join("replicant-renderer"),
            client,
        }
    }

    fn port(&self, slot: usize) -> u16 {
        if slot == 0 {
            self.base_port
        } else {
            self.base_port + 1
        }
    }

    fn user_data_dir(&self, generation: u64) -> PathBuf {
        self.data_root.join(format!("generation-{}", generation))
    }

    /// Full argument list for a generation
    fn command_args(&self, generation: u64, slot: usize) -> Vec<String> {
        let mut args = self.args.clone();
        args.push(format!("--remote-debugging-port={}", self.port(slot)));
        args.push(format!(
            "--user-data-dir={}",
            self.user_data_dir(generation).display()
        ));
        args
    }
}

#[async_trait]
impl RendererLauncher for ChromeLauncher {
    async fn launch(
        &self,
        generation: u64,
        slot: usize,
    ) -> Result<Box<dyn RendererProcess>, RendererError> {
        let user_data_dir = self.user_data_dir(generation);
        let args = self.command_args(generation, slot);
        debug!(generation, slot, binary = %self.binary, ?args, "Launching renderer");

        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RendererError::Launch {
                generation,
                reason: e.to_string(),
            })?;

        Ok(Box::new(ChromeProcess {
            generation,
            endpoint: format!("http://127.0.0.1:{}", self.port(slot)),
            child: Mutex::new(child),
            user_data_dir,
            client: self.client.clone(),
        }))
    }
}

struct ChromeProcess {
    generation: u64,
    endpoint: String,
    child: Mutex<Child>,
    user_data_dir: PathBuf,
    client: reqwest::Client,
}

#[async_trait]
impl RendererProcess for ChromeProcess {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn health_check(&self) -> Result<(), RendererError> {
        if let Ok(Some(status)) = self.child.lock().await.try_wait() {
            return Err(RendererError::HealthCheck(format!(
                "process exited with {}",
                status
            )));
        }

        let url = format!("{}/json/version", self.endpoint);
        let response = self
            .client
            .get(&url)
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
            .map_err(|e| RendererError::HealthCheck(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(RendererError::HealthCheck(format!(
                "{} answered {}",
                url,
                response.status()
            )))
        }
    }

    async fn terminate(&self) {
        let mut child = self.child.lock().await;
        if let Err(e) = child.start_kill() {
            debug!(generation = self.generation, "Renderer already gone: {}", e);
        }
        match tokio::time::timeout(EXIT_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => debug!(generation = self.generation, %status, "Renderer exited"),
            Ok(Err(e)) => warn!(generation = self.generation, "Failed to reap renderer: {}", e),
            Err(_) => warn!(generation = self.generation, "Renderer did not exit in time"),
        }

        if let Err(e) = tokio::fs::remove_dir_all(&self.user_data_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    generation = self.generation,
                    path = %self.user_data_dir.display(),
                    "Failed to remove renderer profile: {}", e
                );
            }
        }
    }
}
