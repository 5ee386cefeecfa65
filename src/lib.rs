//! # Cart CDC
//!
//! A change-detection and event-publication engine for a shopping-cart
//! collection that can only be read in full.
//!
//! ## Architecture
//!
//! Every interval the engine polls the whole collection, compares it with the
//! last committed snapshot and publishes one event per created, modified or
//! deleted cart:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                                cart-cdc                                   │
//! │                                                                           │
//! │  ┌─────────────┐    ┌──────────────┐    ┌──────────────┐    ┌──────────┐  │
//! │  │ CartSource  │───►│ diff()       │───►│ EventBuilder │───►│Publisher │──┼──► bus
//! │  │ (HTTP GET)  │    │ (signatures) │    │ (stable ids) │    │ (retry)  │  │
//! │  └─────────────┘    └──────────────┘    └──────────────┘    └──────────┘  │
//! │                            ▲                                     │        │
//! │                            │                                     ▼        │
//! │                   ┌─────────────────┐                   ┌──────────────┐  │
//! │                   │ SnapshotStore   │◄── commit ────────│ dead letters │  │
//! │                   │ (file / SQLite) │                   │ (JSON files) │  │
//! │                   └─────────────────┘                   └──────────────┘  │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Delivery
//!
//! At-least-once. The snapshot advances only after every event of the cycle
//! has been published or dead-lettered; a crash before the commit replays the
//! same events with the same ids, which consumers use to deduplicate.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cart_cdc::{CdcConfig, ChangeFeed};
//!
//! #[tokio::main]
//! async fn main() -> cart_cdc::Result<()> {
//!     let config = CdcConfig::from_json_file("cart-cdc.json")?;
//!     let mut feed = ChangeFeed::from_config(config).await?;
//!
//!     cart_cdc::controller::spawn_signal_hook(feed.shutdown_handle());
//!     feed.run().await
//! }
//! ```

pub mod archive;
pub mod bus;
pub mod circuit_breaker;
pub mod config;
pub mod controller;
pub mod dead_letter;
pub mod diff;
pub mod entity;
pub mod error;
pub mod event;
pub mod logging;
pub mod metrics;
pub mod publisher;
pub mod resilience;
pub mod snapshot;
pub mod source;

// Re-exports for convenience
pub use bus::{BusMessage, EventBus, LogOnlyBus, RedisStreamBus};
pub use circuit_breaker::{BusCircuit, CircuitBreaker, CircuitConfig, CircuitError};
pub use config::{CdcConfig, SnapshotBackend};
pub use controller::{ChangeFeed, CycleOutcome, CycleReport, CycleState, ShutdownHandle};
pub use dead_letter::{DeadLetterRecord, DeadLetterStore, FileDeadLetterStore};
pub use diff::{diff, ChangeCandidate, DiffOutcome, DiffStats};
pub use entity::{ContentSignature, EntityId, RawEntity};
pub use error::{CdcError, Result};
pub use event::{ChangeEvent, ChangeKind, EventBuilder};
pub use publisher::{PublishOutcome, PublishStats, Publisher};
pub use snapshot::{FileSnapshotStore, Snapshot, SnapshotEntry, SnapshotStore, SqliteSnapshotStore};
pub use source::{CartSource, HttpCartSource};
