//! Transaction executor
//!
//! The single entry point used by the HTTP API: resolves the driver, bounds
//! the whole run (retries included) by the config's timeout, retries failed
//! attempts while the deadline allows, and never lets two runs of the same
//! transaction execute at once.

use chrono::Utc;
use futures_util::FutureExt;
use parking_lot::Mutex;
use replicant_core::duration::parse_positive_duration;
use replicant_core::{Driver, RunContext, TransactionConfig, TransactionError, TransactionResult};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// What a second run of an identity does while the first is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DedupPolicy {
    /// Fail immediately with a busy error
    Reject,
    /// Wait for the in-flight run and return its result
    Wait,
}

/// Extra time granted to a driver to honor cancellation after the deadline
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(1);

/// Share of the previous attempt's duration that must remain before retrying
const RETRY_ESTIMATE_FRACTION: f64 = 0.9;

struct InFlight {
    token: u64,
    result: watch::Receiver<Option<TransactionResult>>,
}

type InFlightMap = Arc<Mutex<HashMap<String, InFlight>>>;

/// Registration of the leading run for an identity
///
/// Removes the registration on drop, whichever way the run ends, including
/// the caller dropping the run future.
struct LeaderGuard {
    identity: String,
    token: u64,
    in_flight: InFlightMap,
    result: watch::Sender<Option<TransactionResult>>,
}

impl LeaderGuard {
    fn publish(&self, result: &TransactionResult) {
        self.result.send_replace(Some(result.clone()));
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock();
        if in_flight
            .get(&self.identity)
            .is_some_and(|entry| entry.token == self.token)
        {
            in_flight.remove(&self.identity);
        }
    }
}

enum Claim {
    Leader(LeaderGuard),
    Follower(watch::Receiver<Option<TransactionResult>>),
}

pub struct Executor {
    drivers: HashMap<String, Arc<dyn Driver>>,
    policy: DedupPolicy,
    cancel_grace: Duration,
    in_flight: InFlightMap,
    next_token: AtomicU64,
}

impl Executor {
    pub fn new(policy: DedupPolicy) -> Self {
        Self {
            drivers: HashMap::new(),
            policy,
            cancel_grace: DEFAULT_CANCEL_GRACE,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    /// Registers a driver under its name
    ///
    /// # Panics
    /// Panics if a driver with the same name is already registered
    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        let name = driver.name().to_string();
        if self.drivers.contains_key(&name) {
            panic!("Driver '{}' is already registered", name);
        }
        self.drivers.insert(name, driver);
    }

    /// Names of the registered drivers, sorted
    pub fn drivers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.drivers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Checks that a config would construct, without running it
    pub fn validate(&self, config: &TransactionConfig) -> Result<(), TransactionError> {
        parse_timeout(config)?;
        self.driver(config)?.new_transaction(config).map(|_| ())
    }

    /// Runs a transaction
    ///
    /// Every failure, including invalid config, unknown driver, timeout and
    /// dedup rejection, is reported in the returned result.
    pub async fn run(&self, id: &str, config: TransactionConfig) -> TransactionResult {
        let identity = if config.name.is_empty() {
            id.to_string()
        } else {
            config.name.clone()
        };

        loop {
            match self.claim(&identity) {
                Claim::Leader(guard) => {
                    let result = self.execute(id, &config).await;
                    guard.publish(&result);
                    info!(
                        transaction = %identity,
                        run = id,
                        failed = result.failed,
                        duration = result.duration_seconds,
                        "Transaction finished"
                    );
                    return result;
                }
                Claim::Follower(mut leader) => match self.policy {
                    DedupPolicy::Reject => {
                        debug!(transaction = %identity, run = id, "Rejecting concurrent run");
                        return TransactionResult::failed(
                            id,
                            &config,
                            TransactionError::Busy(format!(
                                "transaction {} is already running",
                                identity
                            )),
                        );
                    }
                    DedupPolicy::Wait => {
                        debug!(transaction = %identity, run = id, "Waiting for in-flight run");
                        let shared = leader
                            .wait_for(Option::is_some)
                            .await
                            .ok()
                            .and_then(|result| result.clone());
                        if let Some(result) = shared {
                            return result;
                        }
                        // The leader went away without a result; compete again
                    }
                },
            }
        }
    }

    fn claim(&self, identity: &str) -> Claim {
        let mut in_flight = self.in_flight.lock();
        if let Some(entry) = in_flight.get(identity) {
            return Claim::Follower(entry.result.clone());
        }

        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = watch::channel(None);
        in_flight.insert(identity.to_string(), InFlight { token, result: rx });
        Claim::Leader(LeaderGuard {
            identity: identity.to_string(),
            token,
            in_flight: self.in_flight.clone(),
            result: tx,
        })
    }

    fn driver(&self, config: &TransactionConfig) -> Result<&Arc<dyn Driver>, TransactionError> {
        self.drivers.get(&config.driver).ok_or_else(|| {
            TransactionError::Configuration(format!("unknown driver '{}'", config.driver))
        })
    }

    async fn execute(&self, id: &str, config: &TransactionConfig) -> TransactionResult {
        let started_at = Utc::now();
        let start = Instant::now();

        let prepared = parse_timeout(config).and_then(|timeout| Ok((timeout, self.driver(config)?)));
        let (timeout, driver) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(transaction = %config.name, run = id, "Rejected transaction: {}", e);
                return TransactionResult::failed(id, config, e);
            }
        };

        let deadline = start + timeout;
        let ctx = RunContext::new(id, &config.name, deadline);

        let attempts = self.attempts(driver.as_ref(), config, &ctx);
        let result = match tokio::time::timeout_at(deadline + self.cancel_grace, attempts).await {
            Ok(result) => result,
            Err(_) => {
                ctx.cancel();
                warn!(
                    transaction = %config.name,
                    run = id,
                    "Driver ignored cancellation, abandoning run"
                );
                TransactionResult::failed(
                    id,
                    config,
                    TransactionError::Timeout(format!(
                        "run {} exceeded its timeout of {}",
                        id, config.timeout
                    )),
                )
            }
        };

        // Rejected before anything ran
        if matches!(result.error, Some(TransactionError::Configuration(_))) {
            return result;
        }
        result.timed(started_at, start.elapsed())
    }

    async fn attempts(
        &self,
        driver: &dyn Driver,
        config: &TransactionConfig,
        ctx: &RunContext,
    ) -> TransactionResult {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let attempt_start = Instant::now();

            let run = async {
                match driver.new_transaction(config) {
                    Ok(transaction) => transaction.run(ctx).await,
                    Err(e) => TransactionResult::failed(ctx.id(), config, e),
                }
            };
            let result = match AssertUnwindSafe(run).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => TransactionResult::failed(
                    ctx.id(),
                    config,
                    TransactionError::Execution(format!(
                        "driver panicked: {}",
                        panic_message(panic.as_ref())
                    )),
                ),
            };

            let Some(error) = result.error.clone().filter(|_| result.failed) else {
                return result;
            };

            if ctx.is_done() {
                return match error {
                    TransactionError::Timeout(_) | TransactionError::Cancelled(_) => result,
                    other => result.with_error(deadline_error(ctx, attempt, &other)),
                };
            }

            if !error.is_retryable() || attempt > config.retry_count {
                return result;
            }

            // Another attempt only if it can plausibly finish before the deadline
            let last_duration = attempt_start.elapsed();
            if ctx.remaining() < last_duration.mul_f64(RETRY_ESTIMATE_FRACTION) {
                info!(
                    transaction = %config.name,
                    run = ctx.id(),
                    attempt,
                    remaining_ms = ctx.remaining().as_millis() as u64,
                    last_attempt_ms = last_duration.as_millis() as u64,
                    "Not enough time left for another attempt, returning last failure"
                );
                return result;
            }

            warn!(
                transaction = %config.name,
                run = ctx.id(),
                attempt,
                retry_count = config.retry_count,
                "Attempt failed, retrying: {}", error
            );
        }
    }
}

fn parse_timeout(config: &TransactionConfig) -> Result<Duration, TransactionError> {
    parse_positive_duration(&config.timeout).map_err(|e| {
        TransactionError::Configuration(format!("invalid timeout '{}': {}", config.timeout, e))
    })
}

/// Timeout-kind error carrying the last attempt's failure
fn deadline_error(ctx: &RunContext, attempt: u32, last: &TransactionError) -> TransactionError {
    let message = format!(
        "deadline reached after {} attempt(s), last error: {}",
        attempt,
        last.message()
    );
    if ctx.is_cancelled() {
        TransactionError::Cancelled(message)
    } else {
        TransactionError::Timeout(message)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
