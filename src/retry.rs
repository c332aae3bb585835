//! # Retry Policy
//!
//! A single request attempt ends in a value or a [`Failure`]. Whether to try
//! again, and after how long, is decided by [`RetryPolicy::decide`], a pure
//! function of the failure and the attempts made so far. [`RetryPolicy::execute`]
//! drives the loop: acquire a rate-limiter permit, run one attempt, consult the
//! policy, sleep.
//!
//! Transient failures and 429 responses draw from separate budgets, so a
//! throttled program does not lose its retries for genuine network errors.

use std::future::Future;
use std::time::Duration;

use rand::{Rng, thread_rng};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::FetchError;
use crate::config::RetryConfig;
use crate::ratelimit::RateLimiter;

/// Outcome of one failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// Network error, timeout or 5xx
    Transient(String),

    /// 429, with the server's wait hint when one was given
    RateLimited { retry_after: Option<Duration> },

    /// Credentials refused (401/403)
    Fatal { status: u16, message: String },

    /// Any other non-success status; retrying cannot help
    Rejected { status: u16, message: String },

    /// A success status with a body that could not be decoded
    Malformed(String),
}

impl Failure {
    /// Whether a later attempt could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Failure::Transient(_) | Failure::RateLimited { .. })
    }
}

/// Attempts made so far, per budget
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Attempts {
    pub transient: u32,
    pub rate_limited: u32,
}

impl Attempts {
    fn record(&mut self, failure: &Failure) {
        match failure {
            Failure::Transient(_) => self.transient += 1,
            Failure::RateLimited { .. } => self.rate_limited += 1,
            _ => {}
        }
    }

    /// Retryable failures seen so far
    pub fn total(&self) -> u32 {
        self.transient + self.rate_limited
    }
}

/// What to do after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    GiveUp,
}

/// Retry budgets and backoff computation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Decide what to do after `failure`. `attempts` already includes it.
    pub fn decide(&self, failure: &Failure, attempts: &Attempts) -> RetryDecision {
        match failure {
            Failure::Transient(_) if attempts.transient <= self.config.max_retries => {
                RetryDecision::Retry(self.backoff(attempts.transient))
            }
            Failure::RateLimited { retry_after }
                if attempts.rate_limited <= self.config.max_rate_limit_retries =>
            {
                RetryDecision::Retry(retry_after.unwrap_or(self.config.default_retry_after))
            }
            _ => RetryDecision::GiveUp,
        }
    }

    /// Exponential backoff for the `attempt`-th transient failure, capped at `max_delay`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.config
            .base_delay
            .saturating_mul(factor)
            .min(self.config.max_delay)
    }

    /// Run `op` until it succeeds, the policy gives up, or `cancel` fires.
    ///
    /// A rate-limiter permit is acquired before every attempt. Cancellation is
    /// observed while waiting for a permit or sleeping, never in the middle of
    /// an attempt.
    pub async fn execute<T, F, Fut>(
        &self,
        limiter: &RateLimiter,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Failure>>,
    {
        let mut attempts = Attempts::default();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = limiter.acquire() => {}
            }

            let failure = match op().await {
                Ok(value) => return Ok(value),
                Err(failure) => failure,
            };
            attempts.record(&failure);

            match self.decide(&failure, &attempts) {
                RetryDecision::Retry(delay) => {
                    let delay = match &failure {
                        Failure::Transient(_) => jitter(delay),
                        _ => delay,
                    };
                    warn!(
                        "Attempt failed ({:?}); retrying in {} ms ({} transient, {} rate limited)",
                        failure,
                        delay.as_millis(),
                        attempts.transient,
                        attempts.rate_limited
                    );

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                RetryDecision::GiveUp => {
                    let made = attempts.total() + u32::from(!failure.is_retryable());
                    debug!("Giving up after {} attempts: {:?}", made, failure);
                    return Err(FetchError::from_failure(failure, made));
                }
            }
        }
    }
}

/// Spread a delay by ±20 %
fn jitter(delay: Duration) -> Duration {
    if delay.is_zero() {
        return delay;
    }
    let factor = thread_rng().gen_range(0.8..1.2);
    delay.mul_f64(factor)
}
