//! Token bucket rate limiter for provider request throttling.
//!
//! Tokens refill continuously at `requests_per_minute / 60` per second, with
//! a burst capacity of one second's worth of requests.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum tokens in the bucket
    capacity: f64,
    /// Tokens added per second
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
    /// Name for logging
    name: String,
}

impl RateLimiter {
    /// Create a new rate limiter.
    ///
    /// ```ignore
    /// let limiter = RateLimiter::new("snapshot", 300); // 300 req/min = 5 req/sec
    /// ```
    pub fn new(name: impl Into<String>, requests_per_minute: u32) -> Self {
        let refill_per_sec = f64::from(requests_per_minute.max(1)) / 60.0;
        let capacity = refill_per_sec.ceil().max(1.0);

        Self {
            capacity,
            refill_per_sec,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            name: name.into(),
        }
    }

    /// Take a token if one is available; otherwise return how long until the
    /// next one is.
    fn reserve(&self) -> Option<Duration> {
        let mut bucket = self
            .bucket
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            None
        } else {
            let missing = 1.0 - bucket.tokens;
            Some(Duration::from_secs_f64(missing / self.refill_per_sec))
        }
    }

    /// Acquire a token, waiting if necessary.
    pub async fn acquire(&self) {
        while let Some(wait) = self.reserve() {
            let wait = wait.clamp(Duration::from_millis(10), Duration::from_secs(1));
            debug!(
                limiter = %self.name,
                wait_ms = wait.as_millis() as u64,
                "Rate limited, waiting for token"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Try to acquire a token without waiting.
    pub fn try_acquire(&self) -> bool {
        self.reserve().is_none()
    }

    /// Get the configured burst capacity.
    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }
}

/// Shared rate limiter that can be cloned.
pub type SharedRateLimiter = Arc<RateLimiter>;

/// Create a shared rate limiter.
pub fn shared_limiter(name: impl Into<String>, requests_per_minute: u32) -> SharedRateLimiter {
    Arc::new(RateLimiter::new(name, requests_per_minute))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_capacity() {
        assert_eq!(RateLimiter::new("test", 300).capacity(), 5);
        assert_eq!(RateLimiter::new("test", 30).capacity(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_exhausts() {
        let limiter = RateLimiter::new("test", 60); // 1 req/sec
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let limiter = RateLimiter::new("test", 60);
        assert!(limiter.try_acquire());

        let start = Instant::now();
        limiter.acquire().await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(900), "waited {waited:?}");
        assert!(waited <= Duration::from_millis(1100), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_capped() {
        let limiter = RateLimiter::new("test", 120); // capacity 2
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }
}
