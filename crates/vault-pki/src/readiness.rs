//! Bounded retry-until-ready polling.
//!
//! Setup code uses a [`ReadinessGate`] to wait for a backend that is still
//! starting (or a mount that is still activating) before the first issue
//! call. The gate holds no state between calls: each [`wait`](ReadinessGate::wait)
//! owns its deadline and attempt counter.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep_until, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Default overall deadline.
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(10);

/// Default delay between attempts.
pub const DEFAULT_READINESS_INTERVAL: Duration = Duration::from_millis(250);

/// Deadline used when `now + timeout` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Fixed-interval polling with an overall deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessGate {
    timeout: Duration,
    interval: Duration,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new(DEFAULT_READINESS_TIMEOUT, DEFAULT_READINESS_INTERVAL)
    }
}

impl ReadinessGate {
    /// Creates a gate with the given overall deadline and attempt interval.
    #[must_use]
    pub const fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    /// Returns the overall deadline.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the delay between attempts.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Polls `probe` until it succeeds or the deadline passes.
    ///
    /// Each attempt is bounded by the overall deadline, so a hung probe cannot
    /// hold the gate open.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` with the attempt count and the last probe error.
    pub async fn wait<T, E, F, Fut>(&self, mut probe: F) -> Result<T>
    where
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let now = Instant::now();
        let deadline = now.checked_add(self.timeout).unwrap_or_else(|| now + FAR_FUTURE);
        let mut attempts = 0u32;
        let mut last_error = None;

        loop {
            attempts += 1;
            match timeout_at(deadline, probe()).await {
                Ok(Ok(value)) => {
                    debug!(attempts, "backend ready");
                    return Ok(value);
                }
                Ok(Err(err)) => {
                    warn!(attempt = attempts, error = %err, "backend not ready");
                    last_error = Some(err.to_string());
                }
                Err(_) => {
                    warn!(attempt = attempts, "readiness probe still running at deadline");
                    last_error.get_or_insert_with(|| "probe did not complete before the deadline".to_string());
                    break;
                }
            }

            match Instant::now().checked_add(self.interval) {
                Some(next) if next < deadline => sleep_until(next).await,
                _ => break,
            }
        }

        Err(Error::NotReady {
            attempts,
            last_error,
        })
    }

    /// Like [`wait`](Self::wait), but returns `Cancelled` as soon as `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` or `NotReady`.
    pub async fn wait_with_cancel<T, E, F, Fut>(&self, cancel: &CancellationToken, probe: F) -> Result<T>
    where
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled),
            result = self.wait(probe) => result,
        }
    }
}
