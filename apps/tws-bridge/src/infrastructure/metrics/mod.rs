//! Prometheus Metrics Module
//!
//! Exposes bridge metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Events**: Inbound gateway events by kind, ticks applied and dropped
//! - **Correlation**: Pending requests, outcomes, unknown correlations
//! - **Broadcast**: Listener count, deliveries, drops and evictions
//! - **Session**: Connection state, connect attempts, reconnects, pump failures
//! - **Latency**: Request round-trip time
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::session::SessionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "tws_bridge_events_received_total",
        "Inbound gateway events by kind"
    );
    describe_counter!(
        "tws_bridge_ticks_applied_total",
        "Ticks applied to a live subscription"
    );
    describe_counter!(
        "tws_bridge_ticks_dropped_total",
        "Ticks for unknown or cancelled ticker ids"
    );

    describe_gauge!(
        "tws_bridge_pending_requests",
        "Correlation slots awaiting resolution"
    );
    describe_counter!(
        "tws_bridge_requests_completed_total",
        "Resolved correlations by outcome"
    );
    describe_counter!(
        "tws_bridge_unknown_correlations_total",
        "Inbound events referencing an id with no registered slot"
    );

    describe_gauge!(
        "tws_bridge_active_subscriptions",
        "Market data subscriptions in the registry"
    );
    describe_gauge!("tws_bridge_listeners", "Connected broadcast listeners");
    describe_counter!(
        "tws_bridge_broadcasts_sent_total",
        "Snapshot envelopes delivered to listeners"
    );
    describe_counter!(
        "tws_bridge_broadcasts_dropped_total",
        "Snapshot envelopes dropped for slow listeners"
    );
    describe_counter!(
        "tws_bridge_listeners_evicted_total",
        "Listeners removed after a failed delivery"
    );

    describe_gauge!(
        "tws_bridge_session_state",
        "Session state (0 disconnected, 1 connecting, 2 connected, 3 disconnecting)"
    );
    describe_counter!(
        "tws_bridge_connect_attempts_total",
        "Gateway connect attempts by outcome"
    );
    describe_counter!("tws_bridge_reconnects_total", "Supervisor reconnect attempts");
    describe_counter!(
        "tws_bridge_pump_failures_total",
        "Message pump terminations caused by a decode failure"
    );

    describe_histogram!(
        "tws_bridge_request_duration_seconds",
        "Time from request registration to resolution"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Correlation outcome label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Resolved with a value.
    Completed,
    /// Resolved with an error.
    Failed,
    /// Abandoned by a caller timeout.
    TimedOut,
}

impl RequestOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

/// Record an inbound gateway event.
pub fn record_event_received(kind: &'static str) {
    counter!("tws_bridge_events_received_total", "kind" => kind).increment(1);
}

/// Record a tick applied to a subscription.
pub fn record_tick_applied(field: &'static str) {
    counter!("tws_bridge_ticks_applied_total", "field" => field).increment(1);
}

/// Record a tick for a ticker id with no subscription.
pub fn record_tick_dropped() {
    counter!("tws_bridge_ticks_dropped_total").increment(1);
}

/// Update the pending request gauge for one correlation table.
#[allow(clippy::cast_precision_loss)]
pub fn set_pending_requests(table: &'static str, count: usize) {
    gauge!("tws_bridge_pending_requests", "table" => table).set(count as f64);
}

/// Record a resolved correlation and its round trip.
pub fn record_request_resolved(table: &'static str, outcome: RequestOutcome, elapsed: Duration) {
    counter!(
        "tws_bridge_requests_completed_total",
        "table" => table,
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!("tws_bridge_request_duration_seconds", "table" => table)
        .record(elapsed.as_secs_f64());
}

/// Record an inbound event for an unregistered id.
pub fn record_unknown_correlation(kind: &'static str) {
    counter!("tws_bridge_unknown_correlations_total", "kind" => kind).increment(1);
}

/// Update the active subscription gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_subscriptions(count: usize) {
    gauge!("tws_bridge_active_subscriptions").set(count as f64);
}

/// Update the listener gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_listeners(count: usize) {
    gauge!("tws_bridge_listeners").set(count as f64);
}

/// Record envelopes delivered by one publish.
pub fn record_broadcasts_sent(count: u64) {
    counter!("tws_bridge_broadcasts_sent_total").increment(count);
}

/// Record envelopes dropped by one publish.
pub fn record_broadcasts_dropped(count: u64) {
    counter!("tws_bridge_broadcasts_dropped_total").increment(count);
}

/// Record listeners evicted after a failed delivery.
pub fn record_listeners_evicted(count: u64) {
    counter!("tws_bridge_listeners_evicted_total").increment(count);
}

/// Update the session state gauge.
pub fn set_session_state(state: SessionState) {
    gauge!("tws_bridge_session_state").set(f64::from(state as u8));
}

/// Record a connect attempt outcome.
pub fn record_connect_attempt(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!("tws_bridge_connect_attempts_total", "outcome" => outcome).increment(1);
}

/// Record a supervisor reconnect attempt.
pub fn record_reconnect() {
    counter!("tws_bridge_reconnects_total").increment(1);
}

/// Record a pump termination caused by a decode failure.
pub fn record_pump_failure() {
    counter!("tws_bridge_pump_failures_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_as_str() {
        assert_eq!(RequestOutcome::Completed.as_str(), "completed");
        assert_eq!(RequestOutcome::Failed.as_str(), "failed");
        assert_eq!(RequestOutcome::TimedOut.as_str(), "timed_out");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_event_received("tick_price");
        record_request_resolved("requests", RequestOutcome::Completed, Duration::from_millis(3));
        set_session_state(SessionState::Connected);
    }
}
