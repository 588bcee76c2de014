//! Renderer lifecycle: start, lease, recycle, drain

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{RendererError, RendererLauncher, RendererProcess};

/// Lifecycle state of one renderer generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererState {
    Starting,
    Ready,
    Draining,
    Terminated,
}

#[derive(Debug, Clone)]
pub struct RendererSettings {
    /// Time between two recycles
    pub recycle_interval: Duration,
    /// How long an outgoing generation may keep serving in-flight runs
    pub drain_grace: Duration,
    /// Health checks tried before a new generation is given up
    pub health_attempts: u32,
    pub health_interval: Duration,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            recycle_interval: Duration::from_secs(300),
            drain_grace: Duration::from_secs(30),
            health_attempts: 10,
            health_interval: Duration::from_millis(500),
        }
    }
}

struct RendererInstance {
    generation: u64,
    slot: usize,
    process: Box<dyn RendererProcess>,
    state: Mutex<RendererState>,
    in_flight: AtomicUsize,
    drained: Notify,
}

impl RendererInstance {
    fn set_state(&self, state: RendererState) {
        *self.state.lock() = state;
    }

    fn state(&self) -> RendererState {
        *self.state.lock()
    }

    /// Waits until no lease is held or the grace period runs out
    async fn drain(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            // Registered before the check so a release in between is not missed
            let released = self.drained.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, released).await.is_err() {
                return self.in_flight.load(Ordering::SeqCst) == 0;
            }
        }
    }

    async fn terminate(&self) {
        self.process.terminate().await;
        self.set_state(RendererState::Terminated);
    }
}

/// Borrowed handle on the current renderer generation
///
/// The borrow is returned when the lease is dropped, on every exit path.
pub struct RendererLease {
    instance: Arc<RendererInstance>,
}

impl RendererLease {
    pub fn generation(&self) -> u64 {
        self.instance.generation
    }

    pub fn endpoint(&self) -> &str {
        self.instance.process.endpoint()
    }
}

impl Drop for RendererLease {
    fn drop(&mut self) {
        if self.instance.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.instance.drained.notify_waiters();
        }
    }
}

/// Owner of the renderer process lifecycle
///
/// Only the manager starts and terminates processes. Runs read the current
/// generation through `acquire()`; generation swaps happen under the write
/// lock, so a lease is always taken on the generation that is current.
pub struct RendererManager {
    launcher: Arc<dyn RendererLauncher>,
    settings: RendererSettings,
    current: RwLock<Option<Arc<RendererInstance>>>,
    next_generation: AtomicU64,
    lifecycle: tokio::sync::Mutex<()>,
    shutdown: watch::Sender<bool>,
}

impl RendererManager {
    pub fn new(launcher: Arc<dyn RendererLauncher>, settings: RendererSettings) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            launcher,
            settings,
            current: RwLock::new(None),
            next_generation: AtomicU64::new(1),
            lifecycle: tokio::sync::Mutex::new(()),
            shutdown,
        }
    }

    /// Current generation, if a renderer is running
    pub fn generation(&self) -> Option<u64> {
        self.current.read().as_ref().map(|i| i.generation)
    }

    pub fn state(&self) -> Option<RendererState> {
        self.current.read().as_ref().map(|i| i.state())
    }

    /// Leases held on the current generation
    pub fn in_flight(&self) -> usize {
        self.current
            .read()
            .as_ref()
            .map_or(0, |i| i.in_flight.load(Ordering::SeqCst))
    }

    /// Starts the first generation
    pub async fn start(&self) -> Result<u64, RendererError> {
        let _lifecycle = self.lifecycle.lock().await;
        if let Some(generation) = self.generation() {
            return Ok(generation);
        }

        let instance = self.launch_healthy(0).await?;
        let generation = instance.generation;
        *self.current.write() = Some(instance);
        info!(generation, "Renderer ready");
        Ok(generation)
    }

    /// Leases the current generation
    pub fn acquire(&self) -> Result<RendererLease, RendererError> {
        let current = self.current.read();
        let instance = current.as_ref().ok_or(RendererError::Unavailable)?;
        if instance.state() != RendererState::Ready {
            return Err(RendererError::Unavailable);
        }

        // Counted under the read lock: a recycle cannot swap generations in between
        instance.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(RendererLease {
            instance: instance.clone(),
        })
    }

    /// Replaces the current generation with a freshly started one
    ///
    /// The replacement must pass its health check before any run is switched
    /// over. If it does not, the current generation stays in service and the
    /// error is returned. The outgoing generation drains for up to the grace
    /// period and is then terminated.
    pub async fn recycle(&self) -> Result<u64, RendererError> {
        let _lifecycle = self.lifecycle.lock().await;

        // The replacement takes the port slot the live generation is not using
        let slot = self
            .current
            .read()
            .as_ref()
            .map_or(0, |live| 1 - live.slot);
        let replacement = match self.launch_healthy(slot).await {
            Ok(instance) => instance,
            Err(e) => {
                warn!(
                    generation = ?self.generation(),
                    "Renderer recycle failed, keeping current generation: {}", e
                );
                return Err(e);
            }
        };
        let generation = replacement.generation;

        let outgoing = self.current.write().replace(replacement);
        info!(generation, "Switched runs to new renderer generation");

        if let Some(outgoing) = outgoing {
            self.retire(outgoing).await;
        }
        Ok(generation)
    }

    /// Stops the recycler and terminates the current generation
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        let _lifecycle = self.lifecycle.lock().await;
        let outgoing = self.current.write().take();
        if let Some(outgoing) = outgoing {
            self.retire(outgoing).await;
        }
        info!("Renderer stopped");
    }

    /// Recycles on every `recycle_interval` tick until shutdown
    pub fn spawn_recycler(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = self.clone();
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let period = manager.settings.recycle_interval;
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = manager.recycle().await {
                            error!("Scheduled renderer recycle failed: {}", e);
                        }
                    }
                    _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => break,
                }
            }
            debug!("Renderer recycler stopped");
        })
    }

    async fn launch_healthy(&self, slot: usize) -> Result<Arc<RendererInstance>, RendererError> {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        info!(generation, slot, "Starting renderer");

        let process = self.launcher.launch(generation, slot).await?;
        let instance = Arc::new(RendererInstance {
            generation,
            slot,
            process,
            state: Mutex::new(RendererState::Starting),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
        });

        let attempts = self.settings.health_attempts.max(1);
        for attempt in 1..=attempts {
            match instance.process.health_check().await {
                Ok(()) => {
                    instance.set_state(RendererState::Ready);
                    debug!(generation, attempt, "Renderer healthy");
                    return Ok(instance);
                }
                Err(e) => {
                    debug!(generation, attempt, "Renderer not healthy yet: {}", e);
                    if attempt < attempts {
                        tokio::time::sleep(self.settings.health_interval).await;
                    }
                }
            }
        }

        instance.terminate().await;
        Err(RendererError::Unhealthy {
            generation,
            attempts,
        })
    }

    async fn retire(&self, instance: Arc<RendererInstance>) {
        instance.set_state(RendererState::Draining);
        let generation = instance.generation;

        if !instance.drain(self.settings.drain_grace).await {
            warn!(
                generation,
                in_flight = instance.in_flight.load(Ordering::SeqCst),
                "Drain grace elapsed, terminating renderer with runs in flight"
            );
        }
        instance.terminate().await;
        info!(generation, "Renderer terminated");
    }
}
