//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Connection attempts and reconnects
//! - Feed decoding throughput
//! - Write dispatch outcomes
//! - Inactivity timeouts
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `replication_` and follow Prometheus
//! conventions: counters end in `_total`, gauges represent current state.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a source connection attempt.
pub fn record_connect_attempt(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("replication_connect_attempts_total", "status" => status).increment(1);
}

/// Record a reconnect and why it happened.
pub fn record_reconnect(reason: &'static str) {
    counter!("replication_reconnects_total", "reason" => reason).increment(1);
}

/// Record an inactivity timeout firing.
pub fn record_timeout() {
    counter!("replication_inactivity_timeouts_total").increment(1);
}

/// Record change events decoded from the feed.
pub fn record_events_decoded(count: usize) {
    counter!("replication_events_decoded_total").increment(count as u64);
}

/// Record a reserved-id event discarded before classification.
pub fn record_reserved_discarded() {
    counter!("replication_events_reserved_discarded_total").increment(1);
}

/// Record a malformed feed line that was skipped.
pub fn record_malformed_line() {
    counter!("replication_malformed_lines_total").increment(1);
}

/// Record a dispatched write outcome.
pub fn record_write(op: &'static str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("replication_writes_total", "op" => op, "status" => status).increment(1);
}

/// Record how long a single write took end to end.
pub fn record_write_latency(op: &'static str, duration: Duration) {
    histogram!("replication_write_duration_seconds", "op" => op).record(duration.as_secs_f64());
}

/// Record the current connection state as a numbered gauge.
pub fn record_state(state: &str) {
    gauge!("replication_connection_state", "state" => state.to_string()).set(1.0);
}
