//! Bounded retry with backoff
//!
//! Every remote call the service makes (secret lookup, store connect, claim
//! query) goes through [`RetryPolicy::run`] or [`RetryPolicy::run_until`].
//! The policy is stateless between calls: each `run` starts at attempt one.
//!
//! Delays grow geometrically from `base_delay` by `multiplier` and are capped
//! at `max_delay`, so the sequence is non-decreasing and attempts are bounded.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::shutdown::ShutdownSignal;

/// Retry configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (at least 1)
    pub max_attempts: u32,
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Growth factor applied per further failure (values below 1.0 act as 1.0)
    pub multiplier: f64,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Failure of a retried operation
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Every attempt failed; carries the last underlying failure
    #[error("retry exhausted: {operation} failed after {attempts} attempt(s): {source}")]
    Exhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: E,
    },

    /// Shutdown was requested before the operation succeeded
    #[error("{operation} cancelled after {attempts} attempt(s)")]
    Cancelled { operation: String, attempts: u32 },
}

impl<E> RetryError<E> {
    /// Number of attempts actually started
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } | Self::Cancelled { attempts, .. } => *attempts,
        }
    }

    /// The last underlying failure, if the loop ran to exhaustion
    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::Exhausted { source, .. } => Some(source),
            Self::Cancelled { .. } => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl RetryPolicy {
    /// Policy with the given attempt count and base delay, default growth
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::default()
        }
    }

    /// Policy that retries without sleeping
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay to wait after the `failures`-th consecutive failure (1-based).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let cap = self.max_delay.max(self.base_delay);
        let factor = if self.multiplier.is_finite() {
            self.multiplier.max(1.0)
        } else {
            1.0
        };
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * factor.powi(exponent);

        Duration::try_from_secs_f64(secs)
            .map(|d| d.min(cap))
            .unwrap_or(cap)
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.execute(operation, None, op).await
    }

    /// Like [`run`](Self::run), but abandons both an in-flight attempt and the
    /// backoff sleep as soon as `shutdown` fires.
    pub async fn run_until<T, E, F, Fut>(
        &self,
        operation: &str,
        shutdown: &ShutdownSignal,
        op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.execute(operation, Some(shutdown.clone()), op).await
    }

    async fn execute<T, E, F, Fut>(
        &self,
        operation: &str,
        mut shutdown: Option<ShutdownSignal>,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let cancelled = |attempts: u32| RetryError::Cancelled {
            operation: operation.to_string(),
            attempts,
        };

        let mut attempt = 0u32;
        loop {
            if shutdown.as_ref().is_some_and(|s| s.is_triggered()) {
                return Err(cancelled(attempt));
            }
            attempt += 1;

            let outcome = match shutdown.as_mut() {
                Some(signal) => tokio::select! {
                    result = op() => Some(result),
                    _ = signal.triggered() => None,
                },
                None => Some(op().await),
            };

            let err = match outcome {
                Some(Ok(value)) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Some(Err(e)) => e,
                None => return Err(cancelled(attempt)),
            };

            if attempt >= max_attempts {
                error!(operation, attempts = attempt, error = %err, "Retry budget exhausted");
                return Err(RetryError::Exhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    source: err,
                });
            }

            let delay = self.delay_for(attempt);
            warn!(
                operation,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Attempt failed, retrying"
            );

            match shutdown.as_mut() {
                Some(signal) => tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = signal.triggered() => return Err(cancelled(attempt)),
                },
                None => tokio::time::sleep(delay).await,
            }
        }
    }
}
