// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the change feed.
//!
//! Configuration is passed to [`ChangeFeed::from_config()`](crate::ChangeFeed::from_config)
//! and can be constructed programmatically or deserialized from JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use cart_cdc::config::CdcConfig;
//!
//! let mut config = CdcConfig::default();
//! config.poll.interval_sec = 30;
//! config.bus.destination = "carts-events".into();
//! config.bus.local_mode = true;
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! CdcConfig
//! ├── source: SourceConfig          # Where carts are polled from
//! ├── poll: PollConfig              # Cycle interval
//! ├── bus: BusConfig                # Redis stream destination + publish retry
//! ├── snapshot: SnapshotConfig      # Last committed state (file or sqlite)
//! ├── dead_letter: DeadLetterConfig # Failed event records
//! ├── archive: ArchiveConfig        # Optional local copy of every event
//! └── signature: SignatureConfig    # Fields that define "content changed"
//! ```
//!
//! # JSON Example
//!
//! ```json
//! {
//!   "source": { "url": "https://fakestoreapi.com/carts", "request_timeout": "30s" },
//!   "poll": { "interval_sec": 60 },
//!   "bus": { "destination": "carts-events", "redis_url": "redis://127.0.0.1:6379" },
//!   "snapshot": { "backend": "file", "path": "./state/carts_state.json" },
//!   "dead_letter": { "dir": "./dead_letter" }
//! }
//! ```

use crate::error::{CdcError, Result};
use crate::resilience::{RateLimitConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to the change feed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CdcConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub dead_letter: DeadLetterConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub signature: SignatureConfig,
}

impl CdcConfig {
    /// Load configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CdcError::Config(format!("cannot read config {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            CdcError::Config(format!("cannot parse config {}: {}", path.display(), e))
        })
    }

    /// A fast, fully local config rooted in `dir` (local-mode bus, file snapshot).
    pub fn for_testing(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            source: SourceConfig {
                url: "http://127.0.0.1:9/carts".to_string(),
                request_timeout: "500ms".to_string(),
                retry: RetrySettings::testing(),
            },
            poll: PollConfig { interval_sec: 1 },
            bus: BusConfig {
                local_mode: true,
                publish_retry: RetrySettings::testing(),
                ..BusConfig::default()
            },
            snapshot: SnapshotConfig {
                backend: SnapshotBackend::File,
                path: dir.join("state").join("carts_state.json").display().to_string(),
            },
            dead_letter: DeadLetterConfig {
                dir: dir.join("dead_letter").display().to_string(),
            },
            archive: ArchiveConfig::default(),
            signature: SignatureConfig::default(),
        }
    }

    /// Check the configuration for values the controller cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.source.url.trim().is_empty() {
            return Err(CdcError::Config("source.url must not be empty".into()));
        }
        if self.poll.interval_sec == 0 {
            return Err(CdcError::Config("poll.interval_sec must be > 0".into()));
        }
        if self.bus.destination.trim().is_empty() {
            return Err(CdcError::Config("bus.destination must not be empty".into()));
        }
        if !self.bus.local_mode && self.bus.redis_url.as_deref().map_or(true, str::is_empty) {
            return Err(CdcError::Config(
                "bus.redis_url is required unless bus.local_mode is set".into(),
            ));
        }
        self.source.retry.validate("source.retry")?;
        self.bus.publish_retry.validate("bus.publish_retry")?;
        if self.snapshot.path.trim().is_empty() {
            return Err(CdcError::Config("snapshot.path must not be empty".into()));
        }
        if self.dead_letter.dir.trim().is_empty() {
            return Err(CdcError::Config("dead_letter.dir must not be empty".into()));
        }
        if self.signature.fields.is_empty() {
            return Err(CdcError::Config("signature.fields must list at least one field".into()));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Retry settings (serializable view of RetryConfig)
// ═══════════════════════════════════════════════════════════════════════════════

/// Serializable retry settings, converted to a [`RetryConfig`] at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> usize {
    3
}

fn default_initial_delay_ms() -> u64 {
    2000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.25
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 2000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            jitter: 0.25,
        }
    }
}

impl RetrySettings {
    /// Millisecond delays, no jitter.
    pub fn testing() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 10,
            backoff_factor: 2.0,
            jitter: 0.0,
        }
    }

    fn validate(&self, section: &str) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(CdcError::Config(format!("{}.max_attempts must be >= 1", section)));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(CdcError::Config(format!(
                "{}.backoff_factor must be >= 1.0, got {}",
                section, self.backoff_factor
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(CdcError::Config(format!(
                "{}.jitter must be within [0, 1], got {}",
                section, self.jitter
            )));
        }
        Ok(())
    }

    /// Build a runtime retry config with the given per-attempt timeout.
    pub fn to_retry_config(&self, attempt_timeout: Duration) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_factor: self.backoff_factor,
            jitter: self.jitter,
            attempt_timeout,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SourceConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Poll source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// HTTP endpoint returning a JSON array of carts.
    #[serde(default = "default_source_url")]
    pub url: String,

    /// Per-request timeout as a duration string (e.g., "30s").
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,

    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_source_url() -> String {
    "https://fakestoreapi.com/carts".to_string()
}

fn default_request_timeout() -> String {
    "30s".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: default_source_url(),
            request_timeout: default_request_timeout(),
            retry: RetrySettings::default(),
        }
    }
}

impl SourceConfig {
    /// Parse the request_timeout string to a Duration.
    pub fn request_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.request_timeout).unwrap_or(Duration::from_secs(30))
    }

    /// Retry policy for polling.
    pub fn retry_config(&self) -> RetryConfig {
        self.retry.to_retry_config(self.request_timeout_duration())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PollConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Poll cycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Seconds spent idle between cycles.
    #[serde(default = "default_interval_sec")]
    pub interval_sec: u64,
}

fn default_interval_sec() -> u64 {
    60
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { interval_sec: 60 }
    }
}

impl PollConfig {
    /// Get the interval as a Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_sec)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BusConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Message bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Bus destination identifier (the Redis stream key events are appended to).
    #[serde(default = "default_destination")]
    pub destination: String,

    /// Redis URL, required unless `local_mode` is set.
    /// Example: `"redis://bus.example.com:6379"`
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Skip the bus entirely; events are archived/logged and counted as published.
    #[serde(default)]
    pub local_mode: bool,

    /// Approximate MAXLEN applied on XADD. `None` leaves the stream untrimmed.
    #[serde(default)]
    pub max_stream_len: Option<usize>,

    /// Source label stamped on every event and message.
    #[serde(default = "default_source_name")]
    pub source_name: String,

    #[serde(default = "default_publish_retry")]
    pub publish_retry: RetrySettings,

    /// Per-send timeout as a duration string.
    #[serde(default = "default_send_timeout")]
    pub send_timeout: String,

    /// Consecutive send failures before the bus circuit opens.
    #[serde(default = "default_circuit_failure_threshold")]
    pub circuit_failure_threshold: u32,

    /// How long the circuit stays open before probing again (seconds).
    #[serde(default = "default_circuit_reset_timeout")]
    pub circuit_reset_timeout_sec: u64,

    /// Optional sustained publish rate (events/sec).
    #[serde(default)]
    pub rate_limit_per_sec: Option<u32>,
}

fn default_destination() -> String {
    "carts-events".to_string()
}

fn default_source_name() -> String {
    "fake-store-api".to_string()
}

fn default_publish_retry() -> RetrySettings {
    RetrySettings {
        max_attempts: 4,
        ..RetrySettings::default()
    }
}

fn default_send_timeout() -> String {
    "10s".to_string()
}

fn default_circuit_failure_threshold() -> u32 {
    5
}

fn default_circuit_reset_timeout() -> u64 {
    30
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            destination: default_destination(),
            redis_url: None,
            local_mode: false,
            max_stream_len: None,
            source_name: default_source_name(),
            publish_retry: default_publish_retry(),
            send_timeout: default_send_timeout(),
            circuit_failure_threshold: 5,
            circuit_reset_timeout_sec: 30,
            rate_limit_per_sec: None,
        }
    }
}

impl BusConfig {
    /// Parse the send_timeout string to a Duration.
    pub fn send_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.send_timeout).unwrap_or(Duration::from_secs(10))
    }

    /// Retry policy for a single event.
    pub fn retry_config(&self) -> RetryConfig {
        self.publish_retry.to_retry_config(self.send_timeout_duration())
    }

    /// Rate limit configuration, `None` when unthrottled.
    pub fn rate_limit_config(&self) -> Option<RateLimitConfig> {
        self.rate_limit_per_sec
            .filter(|rate| *rate > 0)
            .map(RateLimitConfig::per_second)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Snapshot / dead-letter / archive
// ═══════════════════════════════════════════════════════════════════════════════

/// Which snapshot store implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotBackend {
    /// Single JSON file, replaced atomically.
    #[default]
    File,
    /// Embedded SQLite database, replaced in one transaction.
    Sqlite,
}

/// Snapshot persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default)]
    pub backend: SnapshotBackend,

    /// File path (JSON file or SQLite database).
    #[serde(default = "default_snapshot_path")]
    pub path: String,
}

fn default_snapshot_path() -> String {
    "./state/carts_state.json".to_string()
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            backend: SnapshotBackend::File,
            path: default_snapshot_path(),
        }
    }
}

/// Dead-letter area configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterConfig {
    #[serde(default = "default_dead_letter_dir")]
    pub dir: String,
}

fn default_dead_letter_dir() -> String {
    "./dead_letter".to_string()
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            dir: default_dead_letter_dir(),
        }
    }
}

/// Local event archive configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Root directory for archived events. `None` disables the archive.
    #[serde(default)]
    pub dir: Option<String>,
}

impl ArchiveConfig {
    pub fn dir_path(&self) -> Option<PathBuf> {
        self.dir.as_deref().filter(|d| !d.is_empty()).map(PathBuf::from)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SignatureConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Which payload fields define an entity's content.
///
/// Two polls whose signature fields are semantically equal hash identically,
/// regardless of key order or of the order of items in `unordered_arrays`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureConfig {
    #[serde(default = "default_signature_fields")]
    pub fields: Vec<String>,

    /// Array fields compared as multisets (line items).
    #[serde(default = "default_unordered_arrays")]
    pub unordered_arrays: Vec<String>,
}

fn default_signature_fields() -> Vec<String> {
    vec!["date".to_string(), "products".to_string(), "userId".to_string()]
}

fn default_unordered_arrays() -> Vec<String> {
    vec!["products".to_string()]
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            fields: default_signature_fields(),
            unordered_arrays: default_unordered_arrays(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
