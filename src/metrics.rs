//! Prometheus metrics for the request pipeline.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `webcore_rate_limited_total` - Requests rejected by the rate limiter
//! - `webcore_csrf_rejections_total` - Failed CSRF checks (label: reason)
//! - `webcore_deadline_exceeded_total` - Requests that ran past their deadline
//! - `webcore_faults_total` - Handler faults caught by the recovery layer
//! - `webcore_session_commits_total` - Session commits (label: status)
//! - `webcore_late_responses_total` - Worker responses discarded after a deadline
//!
//! ## Histograms
//! - `webcore_request_duration_seconds` - Time spent in the timeout worker
//!
//! ## Gauges
//! - `webcore_rate_limit_clients` - Clients tracked by the rate limiter

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const RATE_LIMITED_TOTAL: &str = "webcore_rate_limited_total";
    pub const CSRF_REJECTIONS_TOTAL: &str = "webcore_csrf_rejections_total";
    pub const DEADLINE_EXCEEDED_TOTAL: &str = "webcore_deadline_exceeded_total";
    pub const FAULTS_TOTAL: &str = "webcore_faults_total";
    pub const SESSION_COMMITS_TOTAL: &str = "webcore_session_commits_total";
    pub const LATE_RESPONSES_TOTAL: &str = "webcore_late_responses_total";
    pub const REQUEST_DURATION_SECONDS: &str = "webcore_request_duration_seconds";
    pub const RATE_LIMIT_CLIENTS: &str = "webcore_rate_limit_clients";
}

/// Install the Prometheus exporter listening on `metrics_addr` and describe
/// every metric.
///
/// # Errors
///
/// Returns a message when the exporter cannot be installed.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::RATE_LIMITED_TOTAL,
        "Total number of requests rejected by the rate limiter"
    );
    describe_counter!(
        names::CSRF_REJECTIONS_TOTAL,
        "Total number of requests failing CSRF verification"
    );
    describe_counter!(
        names::DEADLINE_EXCEEDED_TOTAL,
        "Total number of requests that exceeded their deadline"
    );
    describe_counter!(
        names::FAULTS_TOTAL,
        "Total number of handler faults caught"
    );
    describe_counter!(
        names::SESSION_COMMITS_TOTAL,
        "Total number of session commits"
    );
    describe_counter!(
        names::LATE_RESPONSES_TOTAL,
        "Total number of responses discarded because the deadline had passed"
    );
    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "Time spent producing a response, in seconds"
    );
    describe_gauge!(
        names::RATE_LIMIT_CLIENTS,
        "Number of clients tracked by the rate limiter"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Like [`init_metrics`], but only logs a failure.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

pub fn record_rate_limited() {
    counter!(names::RATE_LIMITED_TOTAL).increment(1);
}

pub fn record_csrf_rejection(reason: &'static str) {
    counter!(names::CSRF_REJECTIONS_TOTAL, "reason" => reason).increment(1);
}

pub fn record_deadline_exceeded() {
    counter!(names::DEADLINE_EXCEEDED_TOTAL).increment(1);
}

pub fn record_fault() {
    counter!(names::FAULTS_TOTAL).increment(1);
}

pub fn record_session_commit(status: &'static str) {
    counter!(names::SESSION_COMMITS_TOTAL, "status" => status).increment(1);
}

pub fn record_late_response() {
    counter!(names::LATE_RESPONSES_TOTAL).increment(1);
}

pub fn record_request_duration(seconds: f64) {
    histogram!(names::REQUEST_DURATION_SECONDS).record(seconds);
}

pub fn set_rate_limit_clients(count: usize) {
    gauge!(names::RATE_LIMIT_CLIENTS).set(count as f64);
}
