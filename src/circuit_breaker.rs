//! Circuit breaker for message bus protection.
//!
//! When the bus is down, every event would otherwise burn through its full
//! retry budget before being dead-lettered. The breaker short-circuits that:
//! once enough consecutive sends fail, further sends are rejected immediately
//! until the recovery timeout elapses.
//!
//! # States
//!
//! - **Closed**: Normal operation, sends pass through
//! - **Open**: Bus unhealthy, sends fail-fast without attempting
//! - **HalfOpen**: Probing whether the bus recovered
//!
//! # Usage
//!
//! ```rust,no_run
//! # use cart_cdc::circuit_breaker::{BusCircuit, CircuitConfig, CircuitError};
//! # async fn example() -> Result<(), CircuitError<String>> {
//! let circuit = BusCircuit::new(CircuitConfig::default());
//!
//! match circuit.publish.call(|| async { Ok::<(), String>(()) }).await {
//!     Ok(()) => { /* delivered */ }
//!     Err(CircuitError::Rejected) => { /* circuit open, dead-letter */ }
//!     Err(CircuitError::Inner(e)) => { /* bus error, retry */ }
//! }
//! # Ok(())
//! # }
//! ```

use crate::metrics;
use recloser::{AsyncRecloser, Error as RecloserError, Recloser};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Error type for circuit-protected operations.
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    /// The circuit breaker rejected the call (circuit is open).
    #[error("circuit breaker open, request rejected")]
    Rejected,

    /// The underlying operation failed.
    #[error("operation failed: {0}")]
    Inner(#[source] E),
}

impl<E> CircuitError<E> {
    /// Check if this is a rejection (circuit open).
    pub fn is_rejected(&self) -> bool {
        matches!(self, CircuitError::Rejected)
    }

    /// Get the inner error if present.
    pub fn inner(&self) -> Option<&E> {
        match self {
            CircuitError::Inner(e) => Some(e),
            _ => None,
        }
    }
}

/// Configuration for a circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Number of consecutive failures to trip the circuit.
    pub failure_threshold: u32,
    /// Number of consecutive successes in half-open to close circuit.
    pub success_threshold: u32,
    /// How long to wait before attempting recovery (half-open).
    pub recovery_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitConfig {
    /// Build from the bus section of the configuration.
    pub fn from_bus(config: &crate::config::BusConfig) -> Self {
        Self {
            failure_threshold: config.circuit_failure_threshold.max(1),
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(config.circuit_reset_timeout_sec),
        }
    }

    /// Fast recovery for testing.
    pub fn testing() -> Self {
        Self {
            failure_threshold: 2,
            success_threshold: 1,
            recovery_timeout: Duration::from_millis(50),
        }
    }
}

/// A named circuit breaker with call counters.
pub struct CircuitBreaker {
    name: String,
    inner: AsyncRecloser,

    calls_total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and config.
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        // closed_len is the sliding window; the breaker trips only once
        // every call in a full window has failed.
        let recloser = Recloser::custom()
            .error_rate(0.99)
            .closed_len(config.failure_threshold as usize)
            .half_open_len(config.success_threshold as usize)
            .open_wait(config.recovery_timeout)
            .build();

        Self {
            name: name.into(),
            inner: recloser.into(),
            calls_total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute an async operation through the circuit breaker.
    ///
    /// Takes a closure that returns a Future, allowing lazy evaluation.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.calls_total.fetch_add(1, Ordering::Relaxed);

        match self.inner.call(f()).await {
            Ok(result) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                metrics::record_circuit_call(&self.name, "success");
                debug!(circuit = %self.name, "Circuit call succeeded");
                Ok(result)
            }
            Err(RecloserError::Rejected) => {
                self.rejections.fetch_add(1, Ordering::Relaxed);
                metrics::record_circuit_call(&self.name, "rejected");
                warn!(circuit = %self.name, "Circuit breaker rejected call (open)");
                Err(CircuitError::Rejected)
            }
            Err(RecloserError::Inner(e)) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                metrics::record_circuit_call(&self.name, "failure");
                debug!(circuit = %self.name, "Circuit call failed");
                Err(CircuitError::Inner(e))
            }
        }
    }

    #[must_use]
    pub fn calls_total(&self) -> u64 {
        self.calls_total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    /// Get number of failed calls (operation errors).
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Get number of rejected calls (circuit open).
    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }
}

/// Circuit breaker wrapping every bus send.
pub struct BusCircuit {
    pub publish: CircuitBreaker,
}

impl BusCircuit {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            publish: CircuitBreaker::new("bus_publish", config),
        }
    }

    /// Snapshot of the call counters.
    pub fn metrics(&self) -> BusCircuitMetrics {
        BusCircuitMetrics {
            total: self.publish.calls_total(),
            successes: self.publish.successes(),
            failures: self.publish.failures(),
            rejections: self.publish.rejections(),
        }
    }
}

impl Default for BusCircuit {
    fn default() -> Self {
        Self::new(CircuitConfig::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusCircuitMetrics {
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    pub rejections: u64,
}
