//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - Redis testcontainer setup
//! - Recording / failing EventBus mock
//! - Scripted CartSource mock
//! - Helpers to assemble a ChangeFeed around them

#![allow(dead_code)] // Each test binary uses a different subset

pub mod containers;
pub mod mock_bus;
pub mod mock_source;

pub use containers::*;
pub use mock_bus::*;
pub use mock_source::*;

use cart_cdc::circuit_breaker::CircuitConfig;
use cart_cdc::config::CdcConfig;
use cart_cdc::resilience::RetryConfig;
use cart_cdc::{ChangeFeed, EventBus, FileDeadLetterStore, FileSnapshotStore, Publisher};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Circuit settings that never trip during ordinary flaky-bus tests.
pub fn lenient_circuit() -> CircuitConfig {
    CircuitConfig {
        failure_threshold: 1_000,
        success_threshold: 1,
        recovery_timeout: Duration::from_millis(50),
    }
}

/// A publisher over `bus` that dead-letters into `config.dead_letter.dir`.
pub fn publisher_for(config: &CdcConfig, bus: Arc<dyn EventBus>, circuit: CircuitConfig) -> Publisher {
    Publisher::new(
        bus,
        Arc::new(FileDeadLetterStore::new(&config.dead_letter.dir)),
        RetryConfig::testing(),
        circuit,
    )
}

/// A change feed over mocks, with a file snapshot and dead-letter dir under `dir`.
pub fn mock_feed(dir: &Path, source: Arc<ScriptedSource>, bus: Arc<dyn EventBus>) -> ChangeFeed {
    let config = CdcConfig::for_testing(dir);
    feed_with_config(config, source, bus)
}

pub fn feed_with_config(config: CdcConfig, source: Arc<ScriptedSource>, bus: Arc<dyn EventBus>) -> ChangeFeed {
    let store = Arc::new(FileSnapshotStore::new(&config.snapshot.path));
    let publisher = publisher_for(&config, bus, lenient_circuit());
    ChangeFeed::new(config, source, store, publisher)
}

/// A cart in the shape the upstream API returns.
pub fn cart(id: u64, user_id: u64, products: &[(u64, u64)]) -> Value {
    json!({
        "id": id,
        "userId": user_id,
        "date": "2020-03-02T00:00:00.000Z",
        "products": products
            .iter()
            .map(|(product_id, quantity)| json!({ "productId": product_id, "quantity": quantity }))
            .collect::<Vec<_>>(),
        "__v": 0
    })
}
