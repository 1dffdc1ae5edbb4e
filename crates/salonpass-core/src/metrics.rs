//! Lifecycle metrics
//!
//! Prometheus-compatible metrics recorded through the `metrics` facade. They
//! are no-ops until a recorder such as `metrics-exporter-prometheus` is
//! installed.
//!
//! # Metrics
//!
//! - `salonpass_redemptions_total` - Counter of redemptions by result
//! - `salonpass_transitions_total` - Counter of applied transitions by target status
//! - `salonpass_conflict_retries_total` - Counter of version conflict retries
//! - `salonpass_sweep_transitions_total` - Counter of transitions applied by the sweeper
//! - `salonpass_operation_duration_seconds` - Histogram of operation latencies

use std::time::Instant;

use metrics::{counter, histogram};
use salonpass_types::{AuditEntry, SubscriptionStatus};

/// Metric name for redemptions.
pub const REDEMPTIONS_TOTAL: &str = "salonpass_redemptions_total";

/// Metric name for applied transitions.
pub const TRANSITIONS_TOTAL: &str = "salonpass_transitions_total";

/// Metric name for conflict retries.
pub const CONFLICT_RETRIES_TOTAL: &str = "salonpass_conflict_retries_total";

/// Metric name for sweeper transitions.
pub const SWEEP_TRANSITIONS_TOTAL: &str = "salonpass_sweep_transitions_total";

/// Metric name for the operation duration histogram.
pub const OPERATION_DURATION_SECONDS: &str = "salonpass_operation_duration_seconds";

/// Orchestrator operations for metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Purchase,
    Redeem,
    Cancel,
    Renew,
    Callback,
    Sweep,
}

impl Operation {
    /// Get the operation name as a string for metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Redeem => "redeem",
            Self::Cancel => "cancel",
            Self::Renew => "renew",
            Self::Callback => "callback",
            Self::Sweep => "sweep",
        }
    }
}

/// Record a redemption attempt by its error code, or `ok`.
pub fn record_redemption(result: &'static str) {
    counter!(REDEMPTIONS_TOTAL, "result" => result).increment(1);
}

/// Record committed transitions.
pub fn record_transitions(entries: &[AuditEntry]) {
    for entry in entries.iter().filter(|e| e.outcome.is_applied()) {
        counter!(TRANSITIONS_TOTAL, "to" => entry.to.as_str()).increment(1);
    }
}

/// Record a conflict retry.
pub fn record_conflict_retry() {
    counter!(CONFLICT_RETRIES_TOTAL).increment(1);
}

/// Record a transition applied by the sweeper.
pub fn record_sweep_transition(to: SubscriptionStatus) {
    counter!(SWEEP_TRANSITIONS_TOTAL, "to" => to.as_str()).increment(1);
}

/// Timer guard recording an operation's duration when dropped.
#[must_use]
pub struct OperationTimer {
    operation: Operation,
    start: Instant,
}

impl OperationTimer {
    /// Start timing an operation.
    pub fn start(operation: Operation) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        histogram!(OPERATION_DURATION_SECONDS, "operation" => self.operation.as_str())
            .record(self.start.elapsed().as_secs_f64());
    }
}

/// Describe all metrics for registration with a recorder.
pub fn describe_metrics() {
    use metrics::{describe_counter, describe_histogram, Unit};

    describe_counter!(
        REDEMPTIONS_TOTAL,
        Unit::Count,
        "Redemption attempts by result"
    );
    describe_counter!(
        TRANSITIONS_TOTAL,
        Unit::Count,
        "Applied subscription status transitions by target status"
    );
    describe_counter!(
        CONFLICT_RETRIES_TOTAL,
        Unit::Count,
        "Units re-run after an optimistic concurrency conflict"
    );
    describe_counter!(
        SWEEP_TRANSITIONS_TOTAL,
        Unit::Count,
        "Transitions applied by the expiry sweeper"
    );
    describe_histogram!(
        OPERATION_DURATION_SECONDS,
        Unit::Seconds,
        "Duration of lifecycle operations in seconds"
    );
}
