//! Prometheus metrics for the scan loop, order book and executions.
//!
//! Metrics are recorded through the `metrics` facade. Without an
//! installed recorder every call is a no-op, which keeps tests quiet.

use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::debug;

// === Metric Name Constants ===

/// Full scan pass duration.
pub const METRIC_SCAN_DURATION: &str = "scan_duration_ms";
/// Per-exchange quote fetch latency.
pub const METRIC_FEED_FETCH_LATENCY: &str = "feed_fetch_latency_ms";
/// Opportunity detection latency.
pub const METRIC_OPPORTUNITY_DETECTION_LATENCY: &str = "opportunity_detection_latency_ms";
/// Execution latency.
pub const METRIC_EXECUTION_LATENCY: &str = "execution_latency_ms";
/// Scan passes completed.
pub const METRIC_SCANS: &str = "scans_total";
/// Scan passes that failed.
pub const METRIC_SCANS_FAILED: &str = "scans_failed_total";
/// Scan requests merged into a pass already underway.
pub const METRIC_SCANS_COALESCED: &str = "scans_coalesced_total";
/// Exchanges dropped from a cycle.
pub const METRIC_FEED_FAILURES: &str = "feed_failures_total";
/// Opportunities detected.
pub const METRIC_OPPORTUNITIES_DETECTED: &str = "opportunities_detected_total";
/// Opportunities in the latest snapshot.
pub const METRIC_OPPORTUNITIES_CURRENT: &str = "opportunities_current";
/// Orders submitted.
pub const METRIC_ORDERS_SUBMITTED: &str = "orders_submitted_total";
/// Orders triggered (filled).
pub const METRIC_ORDERS_TRIGGERED: &str = "orders_triggered_total";
/// Orders cancelled.
pub const METRIC_ORDERS_CANCELLED: &str = "orders_cancelled_total";
/// Active orders.
pub const METRIC_ORDERS_ACTIVE: &str = "orders_active";
/// Executions that succeeded.
pub const METRIC_EXECUTIONS_SUCCEEDED: &str = "executions_succeeded_total";
/// Executions that failed or timed out.
pub const METRIC_EXECUTIONS_FAILED: &str = "executions_failed_total";
/// Execution requests rejected because the target was already in flight.
pub const METRIC_EXECUTIONS_REJECTED: &str = "executions_in_flight_rejected_total";

/// Install the Prometheus recorder and register descriptions.
///
/// Returns the handle used to render `/metrics`.
pub fn install_recorder() -> Result<PrometheusHandle, String> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("failed to install Prometheus recorder: {}", e))?;
    init_metrics();
    Ok(handle)
}

/// Initialize all metric descriptions.
pub fn init_metrics() {
    // Latency histograms
    describe_histogram!(METRIC_SCAN_DURATION, "Scan pass duration in milliseconds");
    describe_histogram!(
        METRIC_FEED_FETCH_LATENCY,
        "Per-exchange quote fetch latency in milliseconds"
    );
    describe_histogram!(
        METRIC_OPPORTUNITY_DETECTION_LATENCY,
        "Time to detect arbitrage opportunities in milliseconds"
    );
    describe_histogram!(METRIC_EXECUTION_LATENCY, "Execution latency in milliseconds");

    // Counters
    describe_counter!(METRIC_SCANS, "Total number of completed scan passes");
    describe_counter!(METRIC_SCANS_FAILED, "Total number of failed scan passes");
    describe_counter!(
        METRIC_SCANS_COALESCED,
        "Scan requests merged into a pass already underway"
    );
    describe_counter!(METRIC_FEED_FAILURES, "Exchanges dropped from a fetch cycle");
    describe_counter!(
        METRIC_OPPORTUNITIES_DETECTED,
        "Total number of arbitrage opportunities detected"
    );
    describe_counter!(METRIC_ORDERS_SUBMITTED, "Total number of orders submitted");
    describe_counter!(METRIC_ORDERS_TRIGGERED, "Total number of orders triggered");
    describe_counter!(METRIC_ORDERS_CANCELLED, "Total number of orders cancelled");
    describe_counter!(METRIC_EXECUTIONS_SUCCEEDED, "Total number of successful executions");
    describe_counter!(METRIC_EXECUTIONS_FAILED, "Total number of failed executions");
    describe_counter!(
        METRIC_EXECUTIONS_REJECTED,
        "Execution requests rejected as already in flight"
    );

    // Gauges
    describe_gauge!(METRIC_OPPORTUNITIES_CURRENT, "Opportunities in the latest snapshot");
    describe_gauge!(METRIC_ORDERS_ACTIVE, "Orders currently active");

    debug!("Metrics initialized");
}

/// Record per-exchange fetch latency.
pub fn record_feed_fetch_latency(start: Instant, exchange: &str) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_FEED_FETCH_LATENCY, "exchange" => exchange.to_string()).record(latency_ms);
}

/// Record execution latency by target kind.
pub fn record_execution_latency(start: Instant, kind: &'static str) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_EXECUTION_LATENCY, "kind" => kind).record(latency_ms);
}

/// Increment feed failure counter.
pub fn inc_feed_failures(exchange: &str) {
    counter!(METRIC_FEED_FAILURES, "exchange" => exchange.to_string()).increment(1);
}

/// Increment completed scans.
pub fn inc_scans() {
    counter!(METRIC_SCANS).increment(1);
}

/// Increment failed scans.
pub fn inc_scans_failed() {
    counter!(METRIC_SCANS_FAILED).increment(1);
}

/// Increment coalesced scan requests.
pub fn inc_scans_coalesced() {
    counter!(METRIC_SCANS_COALESCED).increment(1);
}

/// Add to opportunities detected counter.
pub fn inc_opportunities_detected(count: u64) {
    counter!(METRIC_OPPORTUNITIES_DETECTED).increment(count);
}

/// Set the current opportunity count.
pub fn set_opportunities_current(count: usize) {
    gauge!(METRIC_OPPORTUNITIES_CURRENT).set(count as f64);
}

/// Increment orders submitted counter.
pub fn inc_orders_submitted() {
    counter!(METRIC_ORDERS_SUBMITTED).increment(1);
}

/// Increment orders triggered counter.
pub fn inc_orders_triggered(order_type: &'static str) {
    counter!(METRIC_ORDERS_TRIGGERED, "type" => order_type).increment(1);
}

/// Increment orders cancelled counter.
pub fn inc_orders_cancelled() {
    counter!(METRIC_ORDERS_CANCELLED).increment(1);
}

/// Set the active order gauge.
pub fn set_orders_active(count: usize) {
    gauge!(METRIC_ORDERS_ACTIVE).set(count as f64);
}

/// Increment successful executions.
pub fn inc_executions_succeeded(kind: &'static str) {
    counter!(METRIC_EXECUTIONS_SUCCEEDED, "kind" => kind).increment(1);
}

/// Increment failed executions.
pub fn inc_executions_failed(kind: &'static str) {
    counter!(METRIC_EXECUTIONS_FAILED, "kind" => kind).increment(1);
}

/// Increment in-flight rejections.
pub fn inc_executions_rejected() {
    counter!(METRIC_EXECUTIONS_REJECTED).increment(1);
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric.
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        histogram!(self.metric_name).record(self.elapsed_ms());
    }
}

/// Create a latency timer for a scan pass.
pub fn timer_scan() -> LatencyTimer {
    LatencyTimer::new(METRIC_SCAN_DURATION)
}

/// Create a latency timer for opportunity detection.
pub fn timer_opportunity_detection() -> LatencyTimer {
    LatencyTimer::new(METRIC_OPPORTUNITY_DETECTION_LATENCY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn latency_timer_measures_time() {
        let timer = timer_scan();
        sleep(Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 9.0);
    }

    #[test]
    fn recording_without_recorder_is_a_noop() {
        inc_feed_failures("uniswap-v3");
        inc_opportunities_detected(3);
        set_orders_active(2);
        record_feed_fetch_latency(Instant::now(), "aerodrome");
    }
}
