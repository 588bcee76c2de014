//! Driver abstraction
//!
//! A `Driver` turns a `TransactionConfig` into a runnable `Transaction`.
//! Construction is pure validation and compilation; `Transaction::run` is the
//! only place that performs I/O and it must observe the `RunContext`'s
//! cancellation signal.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::domain::error::TransactionError;
use crate::domain::transaction::{TransactionConfig, TransactionResult};

/// Execution backend selected by `TransactionConfig::driver`
pub trait Driver: Send + Sync {
    /// Name matched exactly against `TransactionConfig::driver`
    fn name(&self) -> &str;

    /// Validates and compiles a config into a transaction
    ///
    /// Must fail fast, before any external call, with a
    /// `TransactionError::Configuration`.
    fn new_transaction(
        &self,
        config: &TransactionConfig,
    ) -> Result<Box<dyn Transaction>, TransactionError>;
}

/// A compiled transaction, ready to run once
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Runs the transaction
    ///
    /// Never panics across this boundary by contract: internal faults become a
    /// failed result. On cancellation the result carries a timeout or
    /// cancellation error.
    async fn run(&self, ctx: &RunContext) -> TransactionResult;
}

/// Per-run context passed explicitly through the driver call chain
///
/// Carries the run identifier and the cancellation signal: the run is done
/// when either the deadline passes or `cancel()` is called. Clones share the
/// same signal.
#[derive(Debug, Clone)]
pub struct RunContext {
    id: String,
    name: String,
    deadline: Instant,
    cancelled: Arc<watch::Sender<bool>>,
}

impl RunContext {
    pub fn new(id: impl Into<String>, name: impl Into<String>, deadline: Instant) -> Self {
        let (cancelled, _) = watch::channel(false);
        Self {
            id: id.into(),
            name: name.into(),
            deadline,
            cancelled: Arc::new(cancelled),
        }
    }

    /// Convenience constructor with a deadline relative to now
    pub fn with_timeout(id: impl Into<String>, name: impl Into<String>, timeout: Duration) -> Self {
        Self::new(id, name, Instant::now() + timeout)
    }

    /// Run identifier supplied by the caller
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Transaction name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline, zero once it has passed
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Cancels the run; every clone observes it
    pub fn cancel(&self) {
        self.cancelled.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// True once cancelled or past the deadline
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || Instant::now() >= self.deadline
    }

    /// Resolves when the run is cancelled or the deadline passes
    pub async fn done(&self) {
        let mut rx = self.cancelled.subscribe();
        tokio::select! {
            _ = tokio::time::sleep_until(self.deadline) => {}
            _ = async {
                let _ = rx.wait_for(|cancelled| *cancelled).await;
            } => {}
        }
    }

    /// Error describing why the run stopped
    pub fn interruption(&self) -> TransactionError {
        if self.is_cancelled() {
            TransactionError::Cancelled(format!("run {} was cancelled", self.id))
        } else {
            TransactionError::Timeout(format!("run {} exceeded its deadline", self.id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_done_on_deadline() {
        let ctx = RunContext::with_timeout("run-1", "test", Duration::from_millis(20));
        assert!(!ctx.is_done());

        tokio::time::timeout(Duration::from_secs(1), ctx.done())
            .await
            .expect("done() should resolve at the deadline");

        assert!(ctx.is_done());
        assert!(!ctx.is_cancelled());
        assert!(matches!(ctx.interruption(), TransactionError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_cancel_is_shared_between_clones() {
        let ctx = RunContext::with_timeout("run-2", "test", Duration::from_secs(60));
        let clone = ctx.clone();

        let waiter = tokio::spawn(async move { clone.done().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        ctx.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancel should wake waiters")
            .unwrap();

        assert!(ctx.is_done());
        assert!(matches!(ctx.interruption(), TransactionError::Cancelled(_)));
    }

    #[test]
    fn test_remaining_saturates() {
        let ctx = RunContext::new("run-3", "test", Instant::now());
        assert_eq!(ctx.remaining(), Duration::ZERO);
    }
}
