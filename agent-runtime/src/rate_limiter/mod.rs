//! Token-bucket rate limiter (C1): per-key or global, `allow` (non-blocking)
//! and `wait` (blocking, cancellable).
//!
//! Grounded on the DashMap-per-key concurrent-map pattern used throughout the
//! teacher's memory/store layer, generalized to a refill-on-access token
//! bucket (the concrete algorithm comes from the token-bucket rate-limiting
//! reference file in the example pack).

use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::config::RateLimitConfig;
use crate::error::AgentError;

const GLOBAL_KEY: &str = "";

/// Snapshot of one bucket's counters.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitStats {
    pub allowed: u64,
    pub denied: u64,
    pub available_tokens: f64,
    pub last_update: Instant,
}

struct Bucket {
    available_tokens: f64,
    last_refill: Instant,
    hits: u64,
    denies: u64,
}

impl Bucket {
    fn new(burst: f64) -> Self {
        Self {
            available_tokens: burst,
            last_refill: Instant::now(),
            hits: 0,
            denies: 0,
        }
    }

    fn refill(&mut self, rate: f64, burst: f64, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.available_tokens = (self.available_tokens + elapsed * rate).min(burst);
        self.last_refill = now;
    }

    fn try_consume(&mut self, rate: f64, burst: f64) -> bool {
        self.refill(rate, burst, Instant::now());
        if self.available_tokens >= 1.0 {
            self.available_tokens -= 1.0;
            self.hits += 1;
            true
        } else {
            self.denies += 1;
            false
        }
    }

    fn time_to_next_token(&self, rate: f64) -> Duration {
        let deficit = (1.0 - self.available_tokens).max(0.0);
        Duration::from_secs_f64(deficit / rate)
    }
}

/// Token-bucket limiter. One shared bucket when `per_key=false`; otherwise one
/// bucket per key string (empty string is the "global" bucket).
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<String, Mutex<Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Result<Self, AgentError> {
        if config.requests_per_second <= 0.0 {
            return Err(AgentError::InvalidConfig(
                "requests_per_second must be > 0".into(),
            ));
        }
        if config.burst_size < 1 {
            return Err(AgentError::InvalidConfig("burst_size must be >= 1".into()));
        }
        Ok(Self {
            config,
            buckets: DashMap::new(),
        })
    }

    fn bucket_key<'a>(&self, key: &'a str) -> &'a str {
        if self.config.per_key {
            key
        } else {
            GLOBAL_KEY
        }
    }

    fn with_bucket<R>(&self, key: &str, f: impl FnOnce(&mut Bucket) -> R) -> R {
        let key = self.bucket_key(key);
        let entry = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(Bucket::new(self.config.burst_size as f64)));
        let mut bucket = entry.lock().expect("bucket mutex poisoned");
        f(&mut bucket)
    }

    /// Non-blocking: attempts to consume one token, never blocks.
    pub fn allow(&self, key: &str) -> bool {
        self.with_bucket(key, |b| {
            b.try_consume(self.config.requests_per_second, self.config.burst_size as f64)
        })
    }

    /// Blocking variant: if denied, sleeps until the next token is available
    /// (bounded by `wait_timeout`, cancellable via `cancel`), then retries once.
    pub async fn wait(&self, key: &str, cancel: &CancellationToken) -> Result<(), AgentError> {
        if self.allow(key) {
            return Ok(());
        }
        let sleep_for = self.with_bucket(key, |b| b.time_to_next_token(self.config.requests_per_second));
        let wait_timeout = self.config.wait_timeout;

        tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Canceled),
            _ = tokio::time::sleep(sleep_for.min(wait_timeout)) => {}
        }

        if sleep_for > wait_timeout {
            return Err(AgentError::RateLimitWaitTimeout { key: key.to_string() });
        }

        if self.allow(key) {
            Ok(())
        } else {
            Err(AgentError::RateLimitExceeded { key: key.to_string() })
        }
    }

    pub fn stats(&self, key: &str) -> RateLimitStats {
        self.with_bucket(key, |b| RateLimitStats {
            allowed: b.hits,
            denied: b.denies,
            available_tokens: b.available_tokens,
            last_update: b.last_refill,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(rps: f64, burst: u32, per_key: bool) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            requests_per_second: rps,
            burst_size: burst,
            per_key,
            key_timeout: Duration::from_secs(300),
            wait_timeout: Duration::from_millis(500),
        }
    }

    #[test]
    fn construction_rejects_non_positive_rate_or_burst() {
        assert!(RateLimiter::new(cfg(0.0, 3, false)).is_err());
        assert!(RateLimiter::new(cfg(10.0, 0, false)).is_err());
    }

    #[test]
    fn burst_admits_exactly_b_requests_then_denies() {
        let limiter = RateLimiter::new(cfg(10.0, 3, false)).unwrap();
        assert!(limiter.allow(""));
        assert!(limiter.allow(""));
        assert!(limiter.allow(""));
        assert!(!limiter.allow(""));
    }

    #[test]
    fn available_tokens_stay_within_0_and_burst() {
        let limiter = RateLimiter::new(cfg(10.0, 3, false)).unwrap();
        for _ in 0..10 {
            limiter.allow("");
            let s = limiter.stats("");
            assert!(s.available_tokens >= 0.0 && s.available_tokens <= 3.0);
        }
    }

    #[test]
    fn per_key_false_shares_one_bucket_across_keys() {
        let limiter = RateLimiter::new(cfg(10.0, 1, false)).unwrap();
        assert!(limiter.allow("a"));
        assert!(!limiter.allow("b"));
    }

    #[test]
    fn per_key_true_gives_each_key_its_own_bucket() {
        let limiter = RateLimiter::new(cfg(10.0, 1, true)).unwrap();
        assert!(limiter.allow("a"));
        assert!(limiter.allow("b"));
        assert!(!limiter.allow("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_refills_after_token_interval_and_succeeds() {
        let limiter = RateLimiter::new(cfg(10.0, 3, false)).unwrap();
        for _ in 0..3 {
            assert!(limiter.allow(""));
        }
        let cancel = CancellationToken::new();
        limiter.wait("", &cancel).await.unwrap();
        let s = limiter.stats("");
        assert_eq!(s.allowed, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_is_canceled_by_token() {
        let limiter = RateLimiter::new(RateLimitConfig {
            wait_timeout: Duration::from_secs(10),
            ..cfg(1.0, 1, false)
        })
        .unwrap();
        assert!(limiter.allow(""));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = limiter.wait("", &cancel).await.unwrap_err();
        assert!(matches!(err, AgentError::Canceled));
    }
}
