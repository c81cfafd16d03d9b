//! Prometheus Metrics Module
//!
//! Exposes relay and ledger metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Quotes**: Received from upstream, delivered to sinks, dropped
//! - **Upstream**: Commands sent, reconnects, decode errors
//! - **Subscriptions**: Active symbols and sinks
//! - **Ledger**: Orders placed and rejected
//! - **Latency**: Per-quote dispatch duration
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until `init_metrics` installs the recorder.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if another global recorder is already installed.
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
    // Quote flow
    describe_counter!(
        "quote_relay_quotes_received_total",
        "Total quotes decoded from the upstream provider"
    );
    describe_counter!(
        "quote_relay_quotes_delivered_total",
        "Total quotes delivered to downstream sinks"
    );
    describe_counter!(
        "quote_relay_sinks_evicted_total",
        "Total sinks closed after a failed or timed-out send"
    );

    // Upstream
    describe_counter!(
        "quote_relay_decode_errors_total",
        "Total upstream frames dropped because they could not be decoded"
    );
    describe_counter!(
        "quote_relay_upstream_commands_total",
        "Total subscribe/unsubscribe commands sent upstream"
    );
    describe_counter!(
        "quote_relay_reconnects_total",
        "Total upstream reconnection attempts"
    );
    describe_gauge!(
        "quote_relay_upstream_connected",
        "1 while the upstream link is authenticated, else 0"
    );

    // Subscriptions
    describe_gauge!(
        "quote_relay_active_symbols",
        "Number of symbols with at least one downstream sink"
    );
    describe_gauge!(
        "quote_relay_active_sinks",
        "Number of connected downstream sinks"
    );

    // Ledger
    describe_counter!(
        "quote_relay_orders_placed_total",
        "Total orders accepted by the ledger"
    );
    describe_counter!(
        "quote_relay_orders_rejected_total",
        "Total orders rejected by the ledger"
    );

    // Latency
    describe_histogram!(
        "quote_relay_dispatch_seconds",
        "Time to fan one quote out to every registered sink"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a quote decoded from upstream.
pub fn record_quote_received() {
    counter!("quote_relay_quotes_received_total").increment(1);
}

/// Record quotes delivered to sinks.
pub fn record_quotes_delivered(count: u64) {
    counter!("quote_relay_quotes_delivered_total").increment(count);
}

/// Record a sink eviction.
pub fn record_sink_evicted(reason: &'static str) {
    counter!("quote_relay_sinks_evicted_total", "reason" => reason).increment(1);
}

/// Record an undecodable upstream frame.
pub fn record_decode_error(error_type: &'static str) {
    counter!("quote_relay_decode_errors_total", "error_type" => error_type).increment(1);
}

/// Record a command sent upstream.
pub fn record_upstream_command(kind: &'static str) {
    counter!("quote_relay_upstream_commands_total", "command" => kind).increment(1);
}

/// Record an upstream reconnection attempt.
pub fn record_reconnect() {
    counter!("quote_relay_reconnects_total").increment(1);
}

/// Update the upstream connection gauge.
pub fn set_upstream_connected(connected: bool) {
    gauge!("quote_relay_upstream_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Update the subscription gauges.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(symbols: usize, sinks: usize) {
    gauge!("quote_relay_active_symbols").set(symbols as f64);
    gauge!("quote_relay_active_sinks").set(sinks as f64);
}

/// Record an accepted order.
pub fn record_order_placed(side: &'static str, order_type: &'static str) {
    counter!(
        "quote_relay_orders_placed_total",
        "side" => side,
        "type" => order_type
    )
    .increment(1);
}

/// Record a rejected order.
pub fn record_order_rejected(reason: &'static str) {
    counter!("quote_relay_orders_rejected_total", "reason" => reason).increment(1);
}

/// Record how long one quote took to fan out.
pub fn record_dispatch_duration(duration: Duration) {
    histogram!("quote_relay_dispatch_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_quote_received();
        record_quotes_delivered(3);
        record_sink_evicted("timeout");
        record_decode_error("json");
        set_subscriptions(2, 5);
        record_dispatch_duration(Duration::from_millis(1));
    }
}
