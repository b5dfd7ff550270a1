//! Metrics collection and exposition.
//!
//! # Metrics
//! - `dispatch_messages_total` (counter): messages handed to an executor, by rule
//! - `dispatch_failures_total` (counter): executor errors, by rule
//! - `dispatch_duration_seconds` (histogram): executor latency, by rule
//! - `purge_requests_total` (counter): purge requests by outcome
//! - `job_runner_attempts_total` (counter): job deliveries by outcome
//! - `metadata_topics` (gauge): topics in the last fetched catalog
//! - `metadata_refresh_errors_total` (counter): failed catalog fetches

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_dispatch(rule: &str, success: bool, started: Instant) {
    let rule = rule.to_string();
    counter!("dispatch_messages_total", "rule" => rule.clone()).increment(1);
    if !success {
        counter!("dispatch_failures_total", "rule" => rule.clone()).increment(1);
    }
    histogram!("dispatch_duration_seconds", "rule" => rule).record(started.elapsed().as_secs_f64());
}

pub fn record_purge_request(outcome: &'static str) {
    counter!("purge_requests_total", "outcome" => outcome).increment(1);
}

pub fn record_job_attempt(outcome: &'static str) {
    counter!("job_runner_attempts_total", "outcome" => outcome).increment(1);
}

pub fn record_metadata_topics(count: usize) {
    gauge!("metadata_topics").set(count as f64);
}

pub fn record_metadata_error() {
    counter!("metadata_refresh_errors_total").increment(1);
}
