//! Controller state and cycle report types.
//!
//! # State Transitions
//!
//! ```text
//!  Created ──start()──► Idle ◄──────────────────────────────────┐
//!     │                  │                                      │
//!     │ (corrupt        interval elapsed                        │
//!     │  snapshot)       ▼                                      │
//!     ▼               Polling ──(source unavailable)────────────┤
//!  Failed                │                                      │
//!                        ▼                                      │
//!                     Diffing                                   │
//!                        │                                      │
//!                        ▼                                      │
//!                    Publishing ──(dead-letter disk failure)────┤
//!                        │                                      │
//!                        ▼                                      │
//!                    Committing ──(committed / persistence err)─┘
//!
//!  Idle ──shutdown signal──► ShuttingDown ──► Stopped
//! ```
//!
//! A shutdown signal received mid-cycle is honoured once the cycle has
//! returned to `Idle`; in-flight work is never interrupted.

use crate::diff::DiffStats;
use crate::publisher::PublishStats;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// State of the change feed controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    /// Constructed, snapshot not yet loaded.
    Created,
    /// Waiting for the next interval or a shutdown signal.
    Idle,
    Polling,
    Diffing,
    Publishing,
    Committing,
    /// Shutdown requested; releasing resources.
    ShuttingDown,
    /// Shut down cleanly. Safe to drop.
    Stopped,
    /// Could not start (e.g. corrupt snapshot). Operator must intervene.
    Failed,
}

impl std::fmt::Display for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleState::Created => write!(f, "Created"),
            CycleState::Idle => write!(f, "Idle"),
            CycleState::Polling => write!(f, "Polling"),
            CycleState::Diffing => write!(f, "Diffing"),
            CycleState::Publishing => write!(f, "Publishing"),
            CycleState::Committing => write!(f, "Committing"),
            CycleState::ShuttingDown => write!(f, "ShuttingDown"),
            CycleState::Stopped => write!(f, "Stopped"),
            CycleState::Failed => write!(f, "Failed"),
        }
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Every candidate was published or dead-lettered and the snapshot advanced.
    Committed,
    /// The source could not be polled; nothing changed.
    Skipped { reason: String },
    /// Publishing or committing failed; the snapshot did not advance.
    Failed { reason: String },
}

impl CycleOutcome {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Committed => "committed",
            CycleOutcome::Skipped { .. } => "skipped",
            CycleOutcome::Failed { .. } => "failed",
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, CycleOutcome::Committed)
    }
}

/// Summary of one poll cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// 1-based cycle number within this run.
    pub cycle: u64,
    pub outcome: CycleOutcome,
    pub diff: DiffStats,
    pub publish: PublishStats,
    pub duration: Duration,
}

/// Cloneable trigger for a graceful shutdown.
///
/// Triggering is idempotent and never blocks; the controller notices it at
/// the next idle boundary.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub(crate) fn new(tx: Arc<watch::Sender<bool>>) -> Self {
        Self { tx }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}
