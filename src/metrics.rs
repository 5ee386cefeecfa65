//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Poll cycle outcomes and duration
//! - Source fetch attempts
//! - Detected changes by kind
//! - Publish outcomes and dead-letters
//! - Snapshot commits
//! - Circuit breaker state
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `cart_cdc_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! No exporter is installed by the library; without a recorder every call
//! here is a no-op.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record the end of a poll cycle.
pub fn record_cycle(outcome: &str, duration: Duration) {
    counter!("cart_cdc_cycles_total", "outcome" => outcome.to_string()).increment(1);
    histogram!("cart_cdc_cycle_duration_seconds").record(duration.as_secs_f64());
}

/// Record a single source fetch attempt.
pub fn record_fetch_attempt(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("cart_cdc_fetch_attempts_total", "status" => status).increment(1);
}

/// Record how long a successful fetch took.
pub fn record_fetch_latency(duration: Duration) {
    histogram!("cart_cdc_fetch_duration_seconds").record(duration.as_secs_f64());
}

/// Record the size of a successful poll.
pub fn record_fetched_entities(count: usize) {
    gauge!("cart_cdc_source_entities").set(count as f64);
}

/// Record diff results for one cycle.
pub fn record_changes(created: usize, modified: usize, deleted: usize, unchanged: usize) {
    counter!("cart_cdc_changes_total", "kind" => "created").increment(created as u64);
    counter!("cart_cdc_changes_total", "kind" => "modified").increment(modified as u64);
    counter!("cart_cdc_changes_total", "kind" => "deleted").increment(deleted as u64);
    gauge!("cart_cdc_unchanged_entities").set(unchanged as f64);
}

/// Record a published event.
pub fn record_published(event_type: &str, attempts: usize) {
    counter!("cart_cdc_events_published_total", "event_type" => event_type.to_string())
        .increment(1);
    histogram!("cart_cdc_publish_attempts").record(attempts as f64);
}

/// Record an event written to the dead-letter area.
pub fn record_dead_lettered(event_type: &str) {
    counter!("cart_cdc_events_dead_lettered_total", "event_type" => event_type.to_string())
        .increment(1);
}

/// Record a bus send latency.
pub fn record_send_latency(duration: Duration) {
    histogram!("cart_cdc_bus_send_duration_seconds").record(duration.as_secs_f64());
}

/// Record snapshot commit.
pub fn record_snapshot_commit(success: bool, entities: usize, duration: Duration) {
    let status = if success { "success" } else { "failure" };
    counter!("cart_cdc_snapshot_commits_total", "status" => status).increment(1);
    histogram!("cart_cdc_snapshot_commit_duration_seconds").record(duration.as_secs_f64());
    if success {
        gauge!("cart_cdc_snapshot_entities").set(entities as f64);
    }
}

/// Record snapshot SQLite retry (for SQLITE_BUSY/SQLITE_LOCKED).
pub fn snapshot_retries_total(operation: &str) {
    counter!("cart_cdc_snapshot_retries_total", "operation" => operation.to_string()).increment(1);
}

/// Record errors by type.
pub fn record_error(error_type: &str) {
    counter!("cart_cdc_errors_total", "error_type" => error_type.to_string()).increment(1);
}

/// Gauge for controller state.
pub fn set_controller_state(state: &str) {
    // Numeric encoding for alerting
    let value = match state {
        "Created" => 0.0,
        "Idle" => 1.0,
        "Polling" => 2.0,
        "Diffing" => 3.0,
        "Publishing" => 4.0,
        "Committing" => 5.0,
        "ShuttingDown" => 6.0,
        "Stopped" => 7.0,
        "Failed" => 8.0,
        _ => -1.0,
    };
    gauge!("cart_cdc_controller_state").set(value);
}

// =============================================================================
// Circuit Breaker Metrics
// =============================================================================

/// Record circuit breaker call outcome.
pub fn record_circuit_call(circuit_name: &str, outcome: &str) {
    counter!(
        "cart_cdc_circuit_calls_total",
        "circuit" => circuit_name.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}
