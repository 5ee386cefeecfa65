// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Lifecycle controller.
//!
//! The [`ChangeFeed`] owns the committed snapshot and drives one loop:
//!
//! 1. Poll the source ([`crate::source::CartSource`])
//! 2. Diff against the committed snapshot ([`crate::diff::diff`])
//! 3. Build and publish one event per candidate ([`crate::publisher::Publisher`])
//! 4. Commit the new snapshot ([`crate::snapshot::SnapshotStore`])
//! 5. Sleep until the next interval, or exit on shutdown
//!
//! # Commit Rule
//!
//! The snapshot only advances after every candidate of the cycle has been
//! published or dead-lettered. If the commit then fails, the next cycle
//! diffs against the old snapshot and republishes the same events with the
//! same ids; consumers deduplicate them.
//!
//! # Concurrency
//!
//! One cycle at a time, one step at a time. Shutdown is checked only at the
//! idle boundary, so an in-flight cycle always finishes (including its
//! commit) before the controller stops.

mod signal;
mod types;

pub use signal::{spawn_signal_hook, unless_signalled, wait_for_termination};
pub use types::{CycleOutcome, CycleReport, CycleState, ShutdownHandle};

use crate::archive::EventArchive;
use crate::bus::{EventBus, LogOnlyBus, RedisStreamBus};
use crate::circuit_breaker::CircuitConfig;
use crate::config::{CdcConfig, SnapshotBackend};
use crate::dead_letter::FileDeadLetterStore;
use crate::diff::{diff, DiffStats};
use crate::error::{CdcError, Result};
use crate::event::{new_run_id, EventBuilder};
use crate::metrics;
use crate::publisher::{PublishStats, Publisher};
use crate::resilience::RetryConfig;
use crate::snapshot::{FileSnapshotStore, Snapshot, SnapshotStore, SqliteSnapshotStore};
use crate::source::{CartSource, HttpCartSource};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{error, info, info_span, warn, Instrument};

/// The change-detection and event-publication engine.
pub struct ChangeFeed {
    config: CdcConfig,

    source: Arc<dyn CartSource>,
    store: Arc<dyn SnapshotStore>,
    builder: EventBuilder,
    publisher: Publisher,
    archive: Option<EventArchive>,

    /// Last committed snapshot (`None` until `start()`).
    committed: Option<Snapshot>,

    /// Cycles attempted so far in this run.
    cycle: u64,

    state_tx: watch::Sender<CycleState>,
    state_rx: watch::Receiver<CycleState>,

    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ChangeFeed {
    /// Assemble a controller from ready-made components.
    ///
    /// The event source name and archive location come from `config`.
    pub fn new(
        config: CdcConfig,
        source: Arc<dyn CartSource>,
        store: Arc<dyn SnapshotStore>,
        publisher: Publisher,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(CycleState::Created);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let builder = EventBuilder::new(config.bus.source_name.clone(), new_run_id());
        let archive = config.archive.dir_path().map(EventArchive::new);

        Self {
            config,
            source,
            store,
            builder,
            publisher,
            archive,
            committed: None,
            cycle: 0,
            state_tx,
            state_rx,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    /// Build every component from configuration.
    ///
    /// Connects to the bus unless `bus.local_mode` is set.
    pub async fn from_config(config: CdcConfig) -> Result<Self> {
        config.validate()?;

        let source: Arc<dyn CartSource> = Arc::new(HttpCartSource::from_config(&config.source)?);

        let store: Arc<dyn SnapshotStore> = match config.snapshot.backend {
            SnapshotBackend::File => Arc::new(FileSnapshotStore::new(&config.snapshot.path)),
            SnapshotBackend::Sqlite => Arc::new(SqliteSnapshotStore::open(&config.snapshot.path).await?),
        };

        let bus: Arc<dyn EventBus> = if config.bus.local_mode {
            info!(destination = %config.bus.destination, "Local mode, bus publishing disabled");
            Arc::new(LogOnlyBus::new(config.bus.destination.clone()))
        } else {
            let url = config
                .bus
                .redis_url
                .as_deref()
                .ok_or_else(|| CdcError::Config("bus.redis_url is required".into()))?;
            Arc::new(
                RedisStreamBus::connect(
                    url,
                    config.bus.destination.clone(),
                    config.bus.max_stream_len,
                    &RetryConfig::startup(),
                )
                .await?,
            )
        };

        let mut publisher = Publisher::new(
            bus,
            Arc::new(FileDeadLetterStore::new(&config.dead_letter.dir)),
            config.bus.retry_config(),
            CircuitConfig::from_bus(&config.bus),
        );
        if let Some(rate) = config.bus.rate_limit_config() {
            info!(rate_per_sec = rate.refill_rate, burst = rate.burst_size, "Publish rate limiting enabled");
            publisher = publisher.with_rate_limit(rate);
        }

        Ok(Self::new(config, source, store, publisher))
    }

    /// Get current controller state.
    pub fn state(&self) -> CycleState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<CycleState> {
        self.state_rx.clone()
    }

    /// Handle that triggers a graceful shutdown from any task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(Arc::clone(&self.shutdown_tx))
    }

    /// Cycles attempted so far.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn run_id(&self) -> &str {
        self.builder.run_id()
    }

    /// The last committed snapshot, once started.
    pub fn committed_snapshot(&self) -> Option<&Snapshot> {
        self.committed.as_ref()
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    fn set_state(&self, state: CycleState) {
        let _ = self.state_tx.send(state);
        metrics::set_controller_state(&state.to_string());
    }

    /// Load the committed snapshot.
    ///
    /// A corrupt snapshot is fatal: the controller moves to `Failed` and the
    /// error is returned for the operator.
    pub async fn start(&mut self) -> Result<()> {
        if self.state() != CycleState::Created {
            return Err(CdcError::InvalidState {
                expected: "Created".to_string(),
                actual: self.state().to_string(),
            });
        }

        info!(
            run_id = %self.run_id(),
            source = %self.source.describe(),
            destination = %self.publisher.destination(),
            snapshot = %self.store.location(),
            interval_sec = self.config.poll.interval_sec,
            "Starting change feed"
        );

        match self.store.load().await {
            Ok(snapshot) => {
                if snapshot.is_empty() {
                    info!("No committed snapshot, first cycle is a cold start");
                }
                self.committed = Some(snapshot);
                self.set_state(CycleState::Idle);
                Ok(())
            }
            Err(e) => {
                error!(
                    error = %e,
                    snapshot = %self.store.location(),
                    "Cannot load snapshot, refusing to start"
                );
                metrics::record_error(e.kind());
                self.set_state(CycleState::Failed);
                Err(e)
            }
        }
    }

    /// Run one poll → diff → publish → commit cycle.
    ///
    /// Recovered failures are reported in the returned [`CycleReport`]; the
    /// only error is calling this before `start()`.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        if self.state() != CycleState::Idle || self.committed.is_none() {
            return Err(CdcError::InvalidState {
                expected: "Idle".to_string(),
                actual: self.state().to_string(),
            });
        }

        self.cycle += 1;
        let span = info_span!("cycle", cycle = self.cycle, run_id = %self.builder.run_id());
        let report = self.cycle_inner().instrument(span).await;
        self.set_state(CycleState::Idle);

        metrics::record_cycle(report.outcome.label(), report.duration);
        Ok(report)
    }

    async fn cycle_inner(&mut self) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport {
            cycle: self.cycle,
            outcome: CycleOutcome::Committed,
            diff: DiffStats::default(),
            publish: PublishStats::default(),
            duration: Default::default(),
        };

        // POLLING
        self.set_state(CycleState::Polling);
        let current = match self.source.fetch().await {
            Ok(entities) => entities,
            Err(e) => {
                warn!(error = %e, kind = e.kind(), "Poll failed, cycle skipped");
                metrics::record_error(e.kind());
                report.outcome = CycleOutcome::Skipped {
                    reason: e.to_string(),
                };
                report.duration = started.elapsed();
                return report;
            }
        };

        // DIFFING
        self.set_state(CycleState::Diffing);
        let empty = Snapshot::new();
        let previous = self.committed.as_ref().unwrap_or(&empty);
        let outcome = diff(previous, &current, &self.config.signature);
        report.diff = outcome.stats;

        let stats = outcome.stats;
        metrics::record_changes(stats.created, stats.modified, stats.deleted, stats.unchanged);
        if stats.cold_start && stats.created > 0 {
            info!(created = stats.created, "Cold start, publishing every cart as created");
        }

        // PUBLISHING
        self.set_state(CycleState::Publishing);
        let detected_at = Utc::now();
        for candidate in &outcome.candidates {
            let event = self.builder.build(candidate, detected_at);
            if let Some(archive) = &self.archive {
                archive.store(&event).await;
            }

            match self.publisher.publish(&event).await {
                Ok(published) => report.publish.record(&published),
                Err(e) => {
                    error!(
                        event_id = %event.event_id,
                        entity_id = %event.entity_id,
                        error = %e,
                        "Cannot publish or dead-letter event, cycle not committed"
                    );
                    report.outcome = CycleOutcome::Failed {
                        reason: e.to_string(),
                    };
                    report.duration = started.elapsed();
                    return report;
                }
            }
        }

        // COMMITTING
        self.set_state(CycleState::Committing);
        let entities = outcome.next_snapshot.len();
        let commit_started = Instant::now();
        match self.store.commit(&outcome.next_snapshot).await {
            Ok(()) => {
                metrics::record_snapshot_commit(true, entities, commit_started.elapsed());
                self.committed = Some(outcome.next_snapshot);
            }
            Err(e) => {
                metrics::record_snapshot_commit(false, 0, commit_started.elapsed());
                metrics::record_error(e.kind());
                error!(
                    error = %e,
                    snapshot = %self.store.location(),
                    "Snapshot commit failed, cycle will be retried"
                );
                report.outcome = CycleOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        }

        report.duration = started.elapsed();
        info!(
            outcome = report.outcome.label(),
            created = stats.created,
            modified = stats.modified,
            deleted = stats.deleted,
            unchanged = stats.unchanged,
            published = report.publish.published,
            dead_lettered = report.publish.dead_lettered,
            cold_start = stats.cold_start,
            duration_ms = report.duration.as_millis() as u64,
            "Cycle complete"
        );
        report
    }

    /// Run until shutdown.
    ///
    /// Starts the controller if needed, runs the first cycle immediately and
    /// then one per interval. Returns after a clean shutdown, or with the
    /// startup error if the snapshot cannot be loaded.
    pub async fn run(&mut self) -> Result<()> {
        match self.state() {
            CycleState::Created => self.start().await?,
            CycleState::Idle => {}
            other => {
                return Err(CdcError::InvalidState {
                    expected: "Created or Idle".to_string(),
                    actual: other.to_string(),
                })
            }
        }

        let interval = self.config.poll.interval();

        loop {
            if *self.shutdown_rx.borrow_and_update() {
                break;
            }

            self.run_cycle().await?;

            // IDLE
            if *self.shutdown_rx.borrow_and_update() {
                info!("Shutdown requested during cycle, cycle finished first");
                break;
            }

            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Release resources and move to `Stopped`.
    pub async fn shutdown(&mut self) {
        info!(cycles = self.cycle, "Shutting down change feed");
        self.set_state(CycleState::ShuttingDown);
        self.shutdown_tx.send_replace(true);

        if let Err(e) = self.store.close().await {
            warn!(error = %e, "Failed to close snapshot store");
        }

        self.set_state(CycleState::Stopped);
        info!("Change feed stopped");
    }
}
