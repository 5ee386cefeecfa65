// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resilience utilities: retry backoff with jitter, and publish rate limiting.
//!
//! - [`RetryConfig`]: bounded exponential backoff for transient failures
//!   (source polls, bus sends, bus connection)
//! - [`RateLimiter`]: token bucket so a cold-start backfill does not flood the bus
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() {
//! use cart_cdc::resilience::{RateLimiter, RateLimitConfig, RetryConfig};
//!
//! let retry = RetryConfig::poller();
//! let delay = retry.jittered_delay_for_attempt(2, &mut rand::thread_rng());
//!
//! let limiter = RateLimiter::new(RateLimitConfig::default());
//! limiter.acquire().await; // Blocks if over limit
//! # let _ = delay;
//! # }
//! ```

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovLimiter,
};
use rand::Rng;
use std::num::NonZeroU32;
use std::time::Duration;

/// Configuration for retry behavior.
///
/// Attempts are 1-indexed: attempt 1 is the first try, and the delay for
/// attempt `n` is the pause taken *after* attempt `n` failed.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: usize,

    /// Delay after the first failed attempt.
    pub initial_delay: Duration,

    /// Ceiling for exponential backoff.
    pub max_delay: Duration,

    /// Backoff multiplier (e.g., 2.0 = double delay each retry).
    pub backoff_factor: f64,

    /// Fraction of the delay used as the jitter spread (0.25 = +/-25%).
    pub jitter: f64,

    /// Timeout for each individual attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: 0.25,
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Retry policy for polling the cart source.
    ///
    /// # Backoff Schedule
    ///
    /// ```text
    /// Attempt  Delay after failure
    /// -------  -------------------
    /// 1        ~2s
    /// 2        ~4s
    /// 3        (give up, cycle skipped)
    /// ```
    pub fn poller() -> Self {
        Self::default()
    }

    /// Retry policy for sending one event to the bus.
    ///
    /// One initial send plus three retries at ~2s, ~4s and ~8s, after which
    /// the event is dead-lettered.
    pub fn publisher() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: 0.25,
            attempt_timeout: Duration::from_secs(10),
        }
    }

    /// Retry policy for establishing the bus connection at startup.
    pub fn startup() -> Self {
        Self {
            max_attempts: 20,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 1.5,
            jitter: 0.1,
            attempt_timeout: Duration::from_secs(10),
        }
    }

    /// Fast-fail retry for tests.
    pub fn testing() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_factor: 2.0,
            jitter: 0.0,
            attempt_timeout: Duration::from_millis(500),
        }
    }

    /// Calculate delay for a given attempt number (1-indexed), without jitter.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let multiplier = self.backoff_factor.powi(exponent);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        if delay_secs <= 0.0 {
            return Duration::ZERO;
        }

        Duration::from_secs_f64(delay_secs)
    }

    /// Delay for `attempt` spread by +/- `jitter` and clamped to `max_delay`.
    ///
    /// Jitter keeps several restarted instances (or a flapping bus) from
    /// retrying in lockstep.
    pub fn jittered_delay_for_attempt(&self, attempt: usize, rng: &mut impl Rng) -> Duration {
        let base = self.delay_for_attempt(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base.is_zero() {
            return base;
        }

        let base_ms = base.as_secs_f64() * 1000.0;
        let spread = (base_ms * jitter).max(1.0);
        let lower = (base_ms - spread).max(0.0);
        let upper = (base_ms + spread).min(self.max_delay.as_secs_f64() * 1000.0);
        if upper <= lower {
            return base;
        }

        Duration::from_millis(rng.gen_range(lower..=upper).round() as u64)
    }

    /// Whether another attempt is allowed after `attempt` failed.
    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }
}

// =============================================================================
// Rate Limiting
// =============================================================================

/// Configuration for rate limiting.
///
/// Uses a token bucket algorithm: tokens refill at `refill_rate` per second,
/// up to `burst_size` tokens. Each published event consumes one token.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum tokens that can be accumulated (burst capacity).
    pub burst_size: u32,

    /// Tokens added per second (sustained rate).
    pub refill_rate: u32,
}

impl Default for RateLimitConfig {
    /// Default: 1000 events/sec with burst of 100.
    fn default() -> Self {
        Self {
            burst_size: 100,
            refill_rate: 1000,
        }
    }
}

impl RateLimitConfig {
    /// Sustained `per_sec` with a burst of a tenth of that (at least 1).
    pub fn per_second(per_sec: u32) -> Self {
        Self {
            burst_size: (per_sec / 10).max(1),
            refill_rate: per_sec,
        }
    }
}

/// Token bucket rate limiter.
pub struct RateLimiter {
    limiter: GovLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>,
    config: RateLimitConfig,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish()
    }
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        let quota =
            Quota::per_second(NonZeroU32::new(config.refill_rate).unwrap_or(NonZeroU32::MIN))
                .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN));

        let limiter = GovLimiter::direct(quota);

        Self { limiter, config }
    }

    /// Acquire a permit, blocking until one is available.
    ///
    /// This method is cancel-safe.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    /// Try to acquire a permit without blocking.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }

    /// Get the current configuration.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}
