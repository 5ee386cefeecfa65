// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Publisher: deliver an event or dead-letter it.
//!
//! ```text
//! event ──► [rate limit] ──► circuit ──► bus.send ──ok──► Published
//!                              │             │
//!                          rejected        error
//!                              │             │ attempts left? ── yes ──► backoff, retry
//!                              ▼             ▼ no
//!                        dead-letter ◄───────┘
//!                              │
//!                   write ok ──┴── write failed
//!                      │                │
//!                DeadLettered      Err(DeadLetter)  (fails the cycle)
//! ```
//!
//! Both `Published` and `DeadLettered` are success from the controller's
//! point of view: the snapshot may advance. An unreachable bus never halts a
//! cycle; only a local disk failure while dead-lettering does.

use crate::bus::{BusMessage, EventBus};
use crate::circuit_breaker::{BusCircuit, CircuitConfig, CircuitError};
use crate::dead_letter::{DeadLetterRecord, DeadLetterStore};
use crate::error::{CdcError, Result};
use crate::event::ChangeEvent;
use crate::metrics;
use crate::resilience::{RateLimitConfig, RateLimiter, RetryConfig};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// Terminal result of publishing one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published {
        message_id: String,
        attempts: usize,
    },
    DeadLettered {
        reason: String,
        attempts: usize,
        location: String,
    },
}

impl PublishOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, Self::Published { .. })
    }
}

/// Per-cycle publish tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub published: usize,
    pub dead_lettered: usize,
}

impl PublishStats {
    pub fn record(&mut self, outcome: &PublishOutcome) {
        match outcome {
            PublishOutcome::Published { .. } => self.published += 1,
            PublishOutcome::DeadLettered { .. } => self.dead_lettered += 1,
        }
    }
}

pub struct Publisher {
    bus: Arc<dyn EventBus>,
    dead_letters: Arc<dyn DeadLetterStore>,
    circuit: BusCircuit,
    retry: RetryConfig,
    limiter: Option<RateLimiter>,
}

impl Publisher {
    pub fn new(
        bus: Arc<dyn EventBus>,
        dead_letters: Arc<dyn DeadLetterStore>,
        retry: RetryConfig,
        circuit: CircuitConfig,
    ) -> Self {
        Self {
            bus,
            dead_letters,
            circuit: BusCircuit::new(circuit),
            retry,
            limiter: None,
        }
    }

    /// Throttle sends to a sustained rate.
    #[must_use]
    pub fn with_rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.limiter = Some(RateLimiter::new(config));
        self
    }

    pub fn circuit(&self) -> &BusCircuit {
        &self.circuit
    }

    pub fn destination(&self) -> &str {
        self.bus.destination()
    }

    /// Publish one event, falling back to the dead-letter store.
    ///
    /// Returns `Err` only when the dead-letter write itself fails.
    pub async fn publish(&self, event: &ChangeEvent) -> Result<PublishOutcome> {
        let message = match BusMessage::from_event(event) {
            Ok(message) => message,
            Err(e) => return self.dead_letter(event, e.to_string(), 0).await,
        };

        let mut sends = 0;
        let reason = loop {
            if let Some(limiter) = &self.limiter {
                limiter.acquire().await;
            }

            let started = Instant::now();
            let result = self
                .circuit
                .publish
                .call(|| async {
                    match timeout(self.retry.attempt_timeout, self.bus.send(&message)).await {
                        Ok(sent) => sent,
                        Err(_) => Err(CdcError::Publish {
                            event_id: event.event_id.clone(),
                            message: format!(
                                "send timed out after {}ms",
                                self.retry.attempt_timeout.as_millis()
                            ),
                        }),
                    }
                })
                .await;

            match result {
                Ok(message_id) => {
                    sends += 1;
                    metrics::record_send_latency(started.elapsed());
                    metrics::record_published(event.event_type.as_str(), sends);
                    debug!(
                        event_id = %event.event_id,
                        entity_id = %event.entity_id,
                        message_id = %message_id,
                        attempts = sends,
                        "Event published"
                    );
                    return Ok(PublishOutcome::Published {
                        message_id,
                        attempts: sends,
                    });
                }
                Err(CircuitError::Rejected) => {
                    break "circuit open, bus considered unavailable".to_string();
                }
                Err(CircuitError::Inner(e)) => {
                    sends += 1;
                    if !self.retry.should_retry(sends) {
                        break e.to_string();
                    }
                    let delay = self
                        .retry
                        .jittered_delay_for_attempt(sends, &mut rand::thread_rng());
                    warn!(
                        event_id = %event.event_id,
                        entity_id = %event.entity_id,
                        attempt = sends,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Publish failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        self.dead_letter(event, reason, sends).await
    }

    async fn dead_letter(
        &self,
        event: &ChangeEvent,
        reason: String,
        attempts: usize,
    ) -> Result<PublishOutcome> {
        let record = DeadLetterRecord::new(event.clone(), reason.clone(), attempts);
        let location = match self.dead_letters.append(&record).await {
            Ok(location) => location,
            Err(e) => {
                error!(
                    event_id = %event.event_id,
                    entity_id = %event.entity_id,
                    publish_error = %reason,
                    error = %e,
                    "Dead-letter write failed"
                );
                metrics::record_error(e.kind());
                return Err(match e {
                    e @ CdcError::DeadLetter { .. } => e,
                    other => CdcError::DeadLetter {
                        event_id: event.event_id.clone(),
                        message: other.to_string(),
                    },
                });
            }
        };

        metrics::record_dead_lettered(event.event_type.as_str());
        warn!(
            event_id = %event.event_id,
            entity_id = %event.entity_id,
            attempts,
            reason = %reason,
            location = %location,
            "Event dead-lettered"
        );
        Ok(PublishOutcome::DeadLettered {
            reason,
            attempts,
            location,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LogOnlyBus;
    use crate::dead_letter::FileDeadLetterStore;
    use crate::diff::ChangeCandidate;
    use crate::entity::{ContentSignature, EntityId};
    use crate::error::BoxFuture;
    use crate::event::{ChangeKind, EventBuilder};
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    /// Fails the first `failures` sends, then succeeds.
    struct FlakyBus {
        failures: usize,
        calls: AtomicUsize,
    }

    impl EventBus for FlakyBus {
        fn send<'a>(&'a self, _message: &'a BusMessage) -> BoxFuture<'a, String> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n < self.failures {
                    Err(CdcError::bus_msg("XADD", "connection refused"))
                } else {
                    Ok(format!("{}-0", n))
                }
            })
        }

        fn destination(&self) -> &str {
            "flaky"
        }
    }

    fn event(id: &str) -> ChangeEvent {
        EventBuilder::new("fake-store-api", "run00001").build(
            &ChangeCandidate {
                kind: ChangeKind::Created,
                entity_id: EntityId::new(id),
                payload: json!({ "id": id }),
                content_signature: ContentSignature::from_hex("ab"),
            },
            Utc::now(),
        )
    }

    fn lenient_circuit() -> CircuitConfig {
        CircuitConfig {
            failure_threshold: 100,
            success_threshold: 1,
            recovery_timeout: Duration::from_secs(60),
        }
    }

    fn publisher(bus: Arc<dyn EventBus>, dlq_dir: &std::path::Path) -> Publisher {
        Publisher::new(
            bus,
            Arc::new(FileDeadLetterStore::new(dlq_dir)),
            RetryConfig::testing(),
            lenient_circuit(),
        )
    }

    #[tokio::test]
    async fn test_publish_success_first_try() {
        let dir = tempdir().unwrap();
        let publisher = publisher(Arc::new(LogOnlyBus::new("carts-events")), dir.path());

        let outcome = publisher.publish(&event("1")).await.unwrap();
        assert_eq!(
            outcome,
            PublishOutcome::Published {
                message_id: "local-1".to_string(),
                attempts: 1
            }
        );
    }

    #[tokio::test]
    async fn test_publish_recovers_after_transient_failure() {
        let dir = tempdir().unwrap();
        let bus = Arc::new(FlakyBus {
            failures: 2,
            calls: AtomicUsize::new(0),
        });
        let publisher = publisher(bus.clone(), dir.path());

        let outcome = publisher.publish(&event("1")).await.unwrap();
        assert!(matches!(outcome, PublishOutcome::Published { attempts: 3, .. }));
        assert_eq!(bus.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_dead_letter() {
        let dir = tempdir().unwrap();
        let bus = Arc::new(FlakyBus {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        });
        let publisher = publisher(bus.clone(), dir.path());
        let event = event("9");

        let outcome = publisher.publish(&event).await.unwrap();
        match outcome {
            PublishOutcome::DeadLettered { attempts, reason, .. } => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("connection refused"));
            }
            other => panic!("expected DeadLettered, got {other:?}"),
        }

        let records = FileDeadLetterStore::new(dir.path()).list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event, event);
    }

    #[tokio::test]
    async fn test_dead_letter_write_failure_is_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();

        let bus = Arc::new(FlakyBus {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        });
        let publisher = publisher(bus, &blocker.join("dlq"));

        let err = publisher.publish(&event("1")).await.unwrap_err();
        assert!(matches!(err, CdcError::DeadLetter { .. }));
    }

    #[tokio::test]
    async fn test_open_circuit_dead_letters_without_sending() {
        let dir = tempdir().unwrap();
        let bus = Arc::new(FlakyBus {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        });
        let publisher = Publisher::new(
            bus.clone(),
            Arc::new(FileDeadLetterStore::new(dir.path())),
            RetryConfig::testing(),
            CircuitConfig {
                failure_threshold: 1,
                success_threshold: 1,
                recovery_timeout: Duration::from_secs(60),
            },
        );

        for id in ["1", "2", "3"] {
            let outcome = publisher.publish(&event(id)).await.unwrap();
            assert!(!outcome.is_published());
        }

        // Once open, later events skip the bus entirely.
        assert!(publisher.circuit().metrics().rejections >= 1);
        assert!(bus.calls.load(Ordering::SeqCst) < 9);
        assert_eq!(FileDeadLetterStore::new(dir.path()).list().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_publish_with_rate_limit() {
        let dir = tempdir().unwrap();
        let publisher = publisher(Arc::new(LogOnlyBus::new("carts-events")), dir.path())
            .with_rate_limit(RateLimitConfig::per_second(1000));

        for id in ["1", "2", "3"] {
            assert!(publisher.publish(&event(id)).await.unwrap().is_published());
        }
    }

    #[test]
    fn test_publish_stats() {
        let mut stats = PublishStats::default();
        stats.record(&PublishOutcome::Published {
            message_id: "1-0".into(),
            attempts: 1,
        });
        stats.record(&PublishOutcome::DeadLettered {
            reason: "x".into(),
            attempts: 3,
            location: "/tmp/x".into(),
        });
        assert_eq!(
            stats,
            PublishStats {
                published: 1,
                dead_lettered: 1
            }
        );
    }
}
