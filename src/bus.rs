// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Message bus transports.
//!
//! Events go to a Redis stream named after the configured destination. A
//! single stream is totally ordered, so all events for one ordering key are
//! read back in publication order. The ordering key and routing attributes
//! travel as extra stream entry fields next to the JSON envelope:
//!
//! ```text
//! XADD carts-events * data {...envelope...} ordering_key cart_7
//!                      event_id cart_7_9f2c… event_type modified
//!                      source fake-store-api entity_id 7
//! ```
//!
//! [`LogOnlyBus`] stands in for the bus in local mode: it accepts every
//! message and only logs it.

use crate::error::{BoxFuture, CdcError, Result};
use crate::event::ChangeEvent;
use crate::resilience::RetryConfig;
use redis::aio::ConnectionManager;
use redis::streams::StreamMaxlen;
use redis::{AsyncCommands, Client};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// A message ready for the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    /// Serialized event envelope.
    pub data: String,
    pub ordering_key: String,
    /// Routing attributes, in a fixed order.
    pub attributes: Vec<(&'static str, String)>,
}

impl BusMessage {
    pub fn from_event(event: &ChangeEvent) -> Result<Self> {
        let data = serde_json::to_string(event).map_err(|e| {
            CdcError::Internal(format!("cannot serialize event {}: {}", event.event_id, e))
        })?;
        Ok(Self {
            data,
            ordering_key: event.ordering_key.clone(),
            attributes: vec![
                ("event_id", event.event_id.clone()),
                ("event_type", event.event_type.to_string()),
                ("source", event.source.clone()),
                ("entity_id", event.entity_id.to_string()),
            ],
        })
    }

    /// Look up an attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Flatten into stream entry fields.
    fn fields(&self) -> Vec<(&str, &str)> {
        let mut fields = Vec::with_capacity(self.attributes.len() + 2);
        fields.push(("data", self.data.as_str()));
        fields.push(("ordering_key", self.ordering_key.as_str()));
        fields.extend(self.attributes.iter().map(|(k, v)| (*k, v.as_str())));
        fields
    }
}

/// Destination for published messages.
pub trait EventBus: Send + Sync + 'static {
    /// Deliver one message. Returns the bus-assigned message id.
    fn send<'a>(&'a self, message: &'a BusMessage) -> BoxFuture<'a, String>;

    /// Destination name (for logs).
    fn destination(&self) -> &str;
}

/// Publishes to a Redis stream via XADD.
pub struct RedisStreamBus {
    conn: ConnectionManager,
    stream_key: String,
    max_len: Option<usize>,
}

impl RedisStreamBus {
    /// Connect with retry. Each attempt is bounded by `retry.attempt_timeout`.
    pub async fn connect(
        redis_url: &str,
        stream_key: impl Into<String>,
        max_len: Option<usize>,
        retry: &RetryConfig,
    ) -> Result<Self> {
        let stream_key = stream_key.into();
        info!(stream = %stream_key, "Connecting to message bus");

        let client = Client::open(redis_url)
            .map_err(|e| CdcError::Config(format!("Invalid Redis URL: {}", e)))?;

        let mut attempt = 0;
        loop {
            attempt += 1;

            let failure = match timeout(retry.attempt_timeout, client.get_connection_manager()).await {
                Ok(Ok(conn)) => {
                    if attempt > 1 {
                        info!(stream = %stream_key, attempt, "Connected to message bus after retry");
                    } else {
                        info!(stream = %stream_key, "Connected to message bus");
                    }
                    return Ok(Self {
                        conn,
                        stream_key,
                        max_len,
                    });
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {}ms", retry.attempt_timeout.as_millis()),
            };

            if !retry.should_retry(attempt) {
                error!(stream = %stream_key, attempt, error = %failure, "Failed to connect to message bus");
                return Err(CdcError::bus_msg(
                    "CONNECT",
                    format!("failed after {} attempts: {}", attempt, failure),
                ));
            }

            let delay = retry.delay_for_attempt(attempt);
            warn!(
                stream = %stream_key,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "Bus connection attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    async fn xadd(&self, message: &BusMessage) -> Result<String> {
        let mut conn = self.conn.clone();
        let fields = message.fields();

        let id: String = match self.max_len {
            Some(n) => conn
                .xadd_maxlen(&self.stream_key, StreamMaxlen::Approx(n), "*", fields.as_slice())
                .await,
            None => conn.xadd(&self.stream_key, "*", fields.as_slice()).await,
        }
        .map_err(|e| CdcError::bus("XADD", e))?;

        debug!(stream = %self.stream_key, ordering_key = %message.ordering_key, message_id = %id, "XADD ok");
        Ok(id)
    }
}

impl EventBus for RedisStreamBus {
    fn send<'a>(&'a self, message: &'a BusMessage) -> BoxFuture<'a, String> {
        Box::pin(self.xadd(message))
    }

    fn destination(&self) -> &str {
        &self.stream_key
    }
}

/// Local-mode bus: accepts everything, delivers nothing.
pub struct LogOnlyBus {
    destination: String,
    sent: AtomicU64,
}

impl LogOnlyBus {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            sent: AtomicU64::new(0),
        }
    }

    /// Messages accepted so far.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

impl EventBus for LogOnlyBus {
    fn send<'a>(&'a self, message: &'a BusMessage) -> BoxFuture<'a, String> {
        Box::pin(async move {
            let n = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
            info!(
                destination = %self.destination,
                ordering_key = %message.ordering_key,
                event_id = message.attribute("event_id").unwrap_or_default(),
                event_type = message.attribute("event_type").unwrap_or_default(),
                "Local mode, event not sent to bus"
            );
            Ok(format!("local-{}", n))
        })
    }

    fn destination(&self) -> &str {
        &self.destination
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::ChangeCandidate;
    use crate::entity::{ContentSignature, EntityId};
    use crate::event::{ChangeKind, EventBuilder};
    use chrono::Utc;
    use serde_json::json;

    fn event() -> ChangeEvent {
        EventBuilder::new("fake-store-api", "run00001").build(
            &ChangeCandidate {
                kind: ChangeKind::Modified,
                entity_id: EntityId::new("7"),
                payload: json!({ "id": 7, "products": [] }),
                content_signature: ContentSignature::from_hex("beef"),
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_message_from_event() {
        let event = event();
        let message = BusMessage::from_event(&event).unwrap();

        assert_eq!(message.ordering_key, "cart_7");
        assert_eq!(message.attribute("event_id"), Some(event.event_id.as_str()));
        assert_eq!(message.attribute("event_type"), Some("modified"));
        assert_eq!(message.attribute("source"), Some("fake-store-api"));
        assert_eq!(message.attribute("entity_id"), Some("7"));
        assert_eq!(message.attribute("missing"), None);

        let decoded: ChangeEvent = serde_json::from_str(&message.data).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_stream_fields_layout() {
        let message = BusMessage::from_event(&event()).unwrap();
        let fields = message.fields();
        let names: Vec<&str> = fields.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            names,
            vec!["data", "ordering_key", "event_id", "event_type", "source", "entity_id"]
        );
    }

    #[tokio::test]
    async fn test_log_only_bus_accepts_everything() {
        let bus = LogOnlyBus::new("carts-events");
        let message = BusMessage::from_event(&event()).unwrap();

        assert_eq!(bus.send(&message).await.unwrap(), "local-1");
        assert_eq!(bus.send(&message).await.unwrap(), "local-2");
        assert_eq!(bus.sent(), 2);
        assert_eq!(bus.destination(), "carts-events");
    }

    #[tokio::test]
    async fn test_connect_invalid_url() {
        let result =
            RedisStreamBus::connect("not-a-url", "s", None, &RetryConfig::testing()).await;
        assert!(matches!(result, Err(CdcError::Config(_))));
    }
}
