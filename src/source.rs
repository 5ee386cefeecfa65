// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Source poller: fetches the full current cart collection.
//!
//! Each call is a stateless request/response. Transient failures
//! (connection errors, timeouts, non-2xx answers) are retried with jittered
//! exponential backoff; exhausting the attempts yields
//! [`CdcError::SourceUnavailable`] and the controller skips the cycle.
//!
//! A response that arrives but is not a JSON array of objects with usable
//! ids yields [`CdcError::SourcePayload`] immediately. Retrying a malformed
//! body rarely helps, and accepting part of it would read as deletions.

use crate::config::SourceConfig;
use crate::entity::{parse_entities, RawEntity};
use crate::error::{BoxFuture, CdcError, Result};
use crate::metrics;
use crate::resilience::RetryConfig;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, warn};

/// Anything that can produce the current full set of carts.
pub trait CartSource: Send + Sync + 'static {
    /// Retrieve every entity, in source order.
    fn fetch(&self) -> BoxFuture<'_, Vec<RawEntity>>;

    /// Where the entities come from (for logs).
    fn describe(&self) -> &str;
}

enum FetchFailure {
    /// Worth another attempt.
    Transient(String),
    /// The source answered with something unusable.
    Payload(String),
}

/// Polls an HTTP endpoint returning a JSON array of carts.
pub struct HttpCartSource {
    client: reqwest::Client,
    url: String,
    retry: RetryConfig,
}

impl HttpCartSource {
    /// Build a source; `retry.attempt_timeout` bounds each request.
    pub fn new(url: impl Into<String>, retry: RetryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(retry.attempt_timeout)
            .user_agent(concat!("cart-cdc/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CdcError::Config(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            retry,
        })
    }

    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        Self::new(config.url.clone(), config.retry_config())
    }

    async fn fetch_once(&self) -> std::result::Result<Value, FetchFailure> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| FetchFailure::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::Transient(format!("HTTP {}", status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchFailure::Transient(e.to_string()))?;

        serde_json::from_slice(&bytes)
            .map_err(|e| FetchFailure::Payload(format!("response is not JSON: {}", e)))
    }

    async fn fetch_with_retry(&self) -> Result<Vec<RawEntity>> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let started = Instant::now();

            match self.fetch_once().await {
                Ok(body) => {
                    metrics::record_fetch_attempt(true);
                    metrics::record_fetch_latency(started.elapsed());
                    let entities = parse_entities(body)?;
                    debug!(
                        url = %self.url,
                        attempt,
                        entities = entities.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Fetched carts"
                    );
                    metrics::record_fetched_entities(entities.len());
                    return Ok(entities);
                }
                Err(FetchFailure::Payload(message)) => {
                    metrics::record_fetch_attempt(false);
                    return Err(CdcError::SourcePayload(message));
                }
                Err(FetchFailure::Transient(message)) => {
                    metrics::record_fetch_attempt(false);
                    if !self.retry.should_retry(attempt) {
                        return Err(CdcError::SourceUnavailable {
                            attempts: attempt,
                            message,
                        });
                    }

                    let delay = self
                        .retry
                        .jittered_delay_for_attempt(attempt, &mut rand::thread_rng());
                    warn!(
                        url = %self.url,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Source fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl CartSource for HttpCartSource {
    fn fetch(&self) -> BoxFuture<'_, Vec<RawEntity>> {
        Box::pin(self.fetch_with_retry())
    }

    fn describe(&self) -> &str {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_source_exhausts_retries() {
        // Port 9 (discard) is closed on test hosts; connections are refused.
        let source = HttpCartSource::new("http://127.0.0.1:9/carts", RetryConfig::testing()).unwrap();

        let err = source.fetch().await.unwrap_err();
        match err {
            CdcError::SourceUnavailable { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected SourceUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn test_from_config() {
        let config = SourceConfig::default();
        let source = HttpCartSource::from_config(&config).unwrap();
        assert_eq!(source.describe(), "https://fakestoreapi.com/carts");
        assert_eq!(source.retry.max_attempts, 3);
    }
}
