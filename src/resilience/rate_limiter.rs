//! Token-bucket admission control protecting the remote service's quota.
//!
//! # Configuration
//!
//! - `requests_per_second`: steady refill rate of the bucket
//! - `burst_capacity`: maximum tokens held, i.e. the largest burst admitted at once
//!
//! The bucket starts full. A caller without a token sleeps on the tokio timer until the
//! next token is due; if that moment falls at or after the caller's deadline it fails
//! immediately with a deadline error instead of waiting.

use crate::config::RateLimiterConfig;
use crate::error::{GuardError, GuardResult};
use crate::resilience::Deadline;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    enabled: bool,
    refill_per_second: f64,
    capacity: f64,
    bucket: Mutex<Bucket>,
    waits: AtomicU64,
    rejections: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: &RateLimiterConfig) -> Self {
        let capacity = f64::from(config.burst_capacity.max(1));
        Self {
            enabled: config.enabled,
            refill_per_second: config.requests_per_second,
            capacity,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            waits: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    /// Take a token, waiting for one if necessary
    pub async fn acquire(&self, deadline: Deadline) -> GuardResult<()> {
        if !self.enabled {
            return Ok(());
        }

        loop {
            let wait = match self.take_or_wait_time() {
                None => return Ok(()),
                Some(wait) => wait,
            };

            let ready_at = Instant::now().checked_add(wait);
            if ready_at.map_or(true, |ready| ready >= deadline.instant()) {
                self.rejections.fetch_add(1, Ordering::Relaxed);
                debug!(
                    wait_ms = wait.as_millis(),
                    remaining_ms = deadline.remaining().as_millis(),
                    "Rate limit token not available before deadline"
                );
                return Err(GuardError::deadline_exceeded("waiting for a rate limit token"));
            }

            self.waits.fetch_add(1, Ordering::Relaxed);
            debug!(wait_ms = wait.as_millis(), "Waiting for rate limit token");
            tokio::time::sleep(wait).await;
        }
    }

    /// Take a token only if one is available right now
    pub fn try_acquire(&self) -> bool {
        !self.enabled || self.take_or_wait_time().is_none()
    }

    pub fn available_tokens(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens
    }

    pub fn waits(&self) -> u64 {
        self.waits.load(Ordering::Relaxed)
    }

    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// `None` if a token was taken, otherwise the time until the next one
    fn take_or_wait_time(&self) -> Option<Duration> {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return None;
        }

        let missing = 1.0 - bucket.tokens;
        Some(Duration::try_from_secs_f64(missing / self.refill_per_second).unwrap_or(Duration::MAX))
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.refill_per_second)
            .min(self.capacity);
        bucket.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(rate: f64, burst: u32) -> RateLimiter {
        RateLimiter::new(&RateLimiterConfig {
            enabled: true,
            requests_per_second: rate,
            burst_capacity: burst,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn admits_burst_immediately() {
        let limiter = limiter(1.0, 3);
        let deadline = Deadline::after(Duration::from_secs(10));
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire(deadline).await.unwrap();
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(!limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_refill() {
        let limiter = limiter(2.0, 1);
        let deadline = Deadline::after(Duration::from_secs(10));
        let start = Instant::now();

        limiter.acquire(deadline).await.unwrap();
        limiter.acquire(deadline).await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(limiter.waits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fails_fast_when_token_arrives_after_deadline() {
        let limiter = limiter(0.5, 1);
        limiter
            .acquire(Deadline::after(Duration::from_secs(10)))
            .await
            .unwrap();

        let start = Instant::now();
        let error = limiter
            .acquire(Deadline::after(Duration::from_secs(1)))
            .await
            .unwrap_err();

        assert!(error.is_deadline_exceeded());
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.rejections(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_limiter_always_admits() {
        let limiter = RateLimiter::new(&RateLimiterConfig {
            enabled: false,
            requests_per_second: 0.1,
            burst_capacity: 1,
        });
        let deadline = Deadline::after(Duration::from_millis(1));
        for _ in 0..10 {
            limiter.acquire(deadline).await.unwrap();
        }
    }
}
