// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the change feed.
//!
//! Errors are categorized by the component that raised them and carry enough
//! context (path, event id, attempt count) to diagnose a failed cycle from the
//! log line alone.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Recovery |
//! |------------|-----------|----------|
//! | `SourceUnavailable` | Yes | Cycle skipped, retried next interval |
//! | `SourcePayload` | No | Cycle skipped (response shape is wrong) |
//! | `Bus` | Yes | Retried by the publisher, then dead-lettered |
//! | `Publish` | Yes | Dead-lettered |
//! | `Persistence` | No | Cycle not committed, retried next interval |
//! | `DeadLetter` | No | Cycle fails, snapshot not advanced |
//! | `CorruptState` | No | Fatal at startup, operator must intervene |
//! | `Sqlite` | No | Local database issue |
//! | `Config` | No | Fix the configuration and restart |
//! | `InvalidState` | No | Controller state machine violation |
//! | `Shutdown` | No | Controller is terminating |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Retry Behavior
//!
//! Use [`CdcError::is_retryable()`] to decide whether an operation should be
//! retried with backoff. Non-retryable errors indicate local disk problems,
//! configuration mistakes or corrupt state.

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Result type alias for change feed operations.
pub type Result<T> = std::result::Result<T, CdcError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Errors that can occur while polling, diffing, publishing or persisting.
#[derive(Error, Debug)]
pub enum CdcError {
    /// The poll source could not be reached after all retry attempts.
    ///
    /// The lifecycle controller skips the cycle and tries again at the next
    /// interval. The snapshot is left untouched.
    #[error("Source unavailable after {attempts} attempts: {message}")]
    SourceUnavailable { attempts: usize, message: String },

    /// The poll source answered, but not with a JSON array of objects
    /// carrying a usable `id`.
    ///
    /// The whole poll is rejected so a malformed response can never be
    /// mistaken for a mass deletion.
    #[error("Source payload invalid: {0}")]
    SourcePayload(String),

    /// Redis command error while talking to the message bus.
    #[error("Bus error ({operation}): {message}")]
    Bus {
        operation: String,
        message: String,
        #[source]
        source: Option<redis::RedisError>,
    },

    /// An event could not be delivered to the bus.
    #[error("Publish failed for {event_id}: {message}")]
    Publish { event_id: String, message: String },

    /// Snapshot commit could not be completed.
    ///
    /// The cycle is considered failed and state is not advanced.
    #[error("Persistence error ({path}): {message}")]
    Persistence { path: String, message: String },

    /// A persisted snapshot exists but cannot be parsed.
    ///
    /// Fatal at startup: treating corruption as a cold start would re-fire a
    /// `created` event for every live entity.
    #[error("Corrupt snapshot state ({path}): {message}")]
    CorruptState { path: String, message: String },

    /// Writing a dead-letter record failed. The only publish-side error that
    /// fails a cycle.
    #[error("Dead-letter write failed for {event_id}: {message}")]
    DeadLetter { event_id: String, message: String },

    /// SQLite error from the embedded snapshot backend.
    #[error("Snapshot database error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Controller state machine violation.
    ///
    /// Occurs when an operation is attempted in the wrong state
    /// (e.g., calling `run()` twice on the same controller).
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Shutdown in progress.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CdcError {
    /// Create a bus error from a redis::RedisError
    pub fn bus(operation: impl Into<String>, source: redis::RedisError) -> Self {
        Self::Bus {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a bus error without source
    pub fn bus_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Bus {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a persistence error for a path.
    pub fn persistence(path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Persistence {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Create a corrupt-state error for a path.
    pub fn corrupt(path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::CorruptState {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SourceUnavailable { .. } => true,
            Self::Bus { .. } => true,
            Self::Publish { .. } => true,
            Self::SourcePayload(_) => false,
            Self::Persistence { .. } => false,
            Self::CorruptState { .. } => false,
            Self::DeadLetter { .. } => false,
            Self::Sqlite(_) => false,
            Self::Config(_) => false,
            Self::InvalidState { .. } => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }

    /// Short label for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceUnavailable { .. } => "source_unavailable",
            Self::SourcePayload(_) => "source_payload",
            Self::Bus { .. } => "bus",
            Self::Publish { .. } => "publish",
            Self::Persistence { .. } => "persistence",
            Self::CorruptState { .. } => "corrupt_state",
            Self::DeadLetter { .. } => "dead_letter",
            Self::Sqlite(_) => "sqlite",
            Self::Config(_) => "config",
            Self::InvalidState { .. } => "invalid_state",
            Self::Shutdown => "shutdown",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<redis::RedisError> for CdcError {
    fn from(e: redis::RedisError) -> Self {
        Self::bus("unknown", e)
    }
}
