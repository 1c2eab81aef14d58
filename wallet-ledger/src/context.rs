//! Per-call deadline and cancellation
//!
//! Every engine operation runs inside an [`OpContext`]. When the deadline
//! passes or the token is cancelled, the operation's future is dropped.
//! Dropping it drops any open storage transaction, which rolls it back.

use crate::error::{LedgerError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Deadline and cancellation handle carried by one engine call
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    deadline: Option<Instant>,
    cancel: Option<CancellationToken>,
}

impl OpContext {
    /// No caller deadline; the engine's default timeout applies
    pub fn background() -> Self {
        Self::default()
    }

    /// Deadline `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: None,
        }
    }

    /// Absolute deadline
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: None,
        }
    }

    /// Attach a cancellation token
    pub fn cancelled_by(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Run `fut` until it finishes, the deadline passes, or the token fires.
    /// `default_timeout` is used when the context has no deadline of its own.
    pub async fn run<F, T>(&self, default_timeout: Duration, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let deadline = self.deadline.unwrap_or(started + default_timeout);
        let cancel = self.cancel.clone().unwrap_or_default();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LedgerError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => {
                Err(LedgerError::DeadlineExceeded(started.elapsed()))
            }
            result = fut => result,
        }
    }
}
