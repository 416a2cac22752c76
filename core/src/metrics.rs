//! Admission metrics.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the host
//! process installs a recorder (the `slotguard` binary installs a Prometheus
//! exporter).
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `slotguard_reservations_total{outcome}` - Admission attempts by outcome
//! - `slotguard_identity_cache_total{result}` - Identity lookups by hit/miss
//!
//! ## Gauges
//! - `slotguard_saturated_schedules` - Schedules currently saturated in the tracker
//!
//! ## Histograms
//! - `slotguard_admission_duration_seconds` - Time spent in `reserve`

use metrics::{describe_counter, describe_gauge, describe_histogram};
use std::time::Duration;

/// Register metric descriptions. Call once at startup.
pub fn register_metrics() {
    describe_counter!(
        "slotguard_reservations_total",
        "Reservation attempts by outcome (admitted, capacity_exceeded, already_reserved, ...)"
    );
    describe_counter!(
        "slotguard_identity_cache_total",
        "Identity cache lookups by result (hit, miss)"
    );
    describe_gauge!(
        "slotguard_saturated_schedules",
        "Schedules the admission tracker currently reports as saturated"
    );
    describe_histogram!(
        "slotguard_admission_duration_seconds",
        "Time taken by one reservation attempt, including lock waits"
    );

    tracing::info!("Admission metrics registered");
}

/// Record the outcome of one reservation attempt.
pub fn record_admission(outcome: &'static str, elapsed: Duration) {
    metrics::counter!("slotguard_reservations_total", "outcome" => outcome).increment(1);
    metrics::histogram!("slotguard_admission_duration_seconds").record(elapsed.as_secs_f64());
}

/// Record an identity cache lookup.
pub fn record_identity_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    metrics::counter!("slotguard_identity_cache_total", "result" => result).increment(1);
}

/// A tracked schedule just became saturated.
pub fn record_schedule_saturated() {
    metrics::gauge!("slotguard_saturated_schedules").increment(1.0);
}

/// The tracker was cleared.
pub fn reset_saturated_schedules() {
    metrics::gauge!("slotguard_saturated_schedules").set(0.0);
}
