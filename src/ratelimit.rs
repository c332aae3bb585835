//! # Global Request Rate Limiter
//!
//! Every network call acquires a permit here first. Two gates are passed in order:
//!
//! 1. an optional `governor` token bucket that spreads requests out instead of
//!    letting every worker fire at once
//! 2. a sliding-window log of issue instants that admits a request only while
//!    fewer than `max_requests` were issued in the trailing window
//!
//! The second gate is the hard ceiling: no window of the configured length ever
//! sees more than `max_requests` permits, however many workers share the limiter.

use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{Instrument, debug, debug_span};

use crate::config::RateLimitConfig;

/// Shared rate limiter. Clones share the same budget.
#[derive(Clone)]
pub struct RateLimiter {
    bucket: Option<Arc<DefaultDirectRateLimiter>>,
    max_requests: usize,
    window: Duration,
    issued: Arc<Mutex<VecDeque<Instant>>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_requests", &self.max_requests)
            .field("window", &self.window)
            .field("smoothing", &self.bucket.is_some())
            .finish()
    }
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let max_requests = config.max_requests.max(1);
        let bucket = config
            .burst
            .and_then(NonZeroU32::new)
            .and_then(|burst| {
                Quota::with_period(config.window / max_requests).map(|q| q.allow_burst(burst))
            })
            .map(|quota| Arc::new(governor::RateLimiter::direct(quota)));

        Self {
            bucket,
            max_requests: max_requests as usize,
            window: config.window,
            issued: Arc::new(Mutex::new(VecDeque::with_capacity(max_requests as usize))),
        }
    }

    /// Wait until one more request may be issued
    pub async fn acquire(&self) {
        if let Some(bucket) = &self.bucket {
            bucket.until_ready().instrument(debug_span!("bucket")).await;
        }
        self.admit().instrument(debug_span!("window")).await;
    }

    async fn admit(&self) {
        loop {
            let mut issued = self.issued.lock().await;
            let now = Instant::now();

            while let Some(oldest) = issued.front() {
                if now.duration_since(*oldest) >= self.window {
                    issued.pop_front();
                } else {
                    break;
                }
            }

            let wait = match issued.front() {
                Some(oldest) if issued.len() >= self.max_requests => {
                    self.window - now.duration_since(*oldest)
                }
                _ => {
                    issued.push_back(now);
                    return;
                }
            };

            debug!(
                "Request ceiling reached ({} in window). Waiting {} ms",
                issued.len(),
                wait.as_millis()
            );

            // Release the lock while waiting
            drop(issued);
            tokio::time::sleep(wait).await;
        }
    }

    /// Number of permits handed out in the trailing window
    pub async fn issued_in_window(&self) -> usize {
        let issued = self.issued.lock().await;
        let now = Instant::now();
        issued
            .iter()
            .filter(|at| now.duration_since(**at) < self.window)
            .count()
    }
}
