//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): inbound requests by route, status
//! - `proxy_request_duration_seconds` (histogram): inbound latency by route
//! - `upstream_attempts_total` (counter): token endpoint attempts by outcome
//! - `upstream_retries_total` (counter): retries scheduled
//! - `circuit_breaker_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `circuit_breaker_transitions_total` (counter): transitions by target state
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so tests need no setup
//! - Labels are low-cardinality (route names, outcomes, status codes)

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::CircuitState;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    ::metrics::describe_counter!("proxy_requests_total", "Inbound requests by route and status");
    ::metrics::describe_histogram!(
        "proxy_request_duration_seconds",
        "Inbound request latency by route"
    );
    ::metrics::describe_counter!("upstream_attempts_total", "Token endpoint attempts by outcome");
    ::metrics::describe_counter!("upstream_retries_total", "Token endpoint retries scheduled");
    ::metrics::describe_gauge!("circuit_breaker_state", "0=closed, 1=open, 2=half-open");
    ::metrics::describe_counter!(
        "circuit_breaker_transitions_total",
        "Circuit breaker transitions by target state"
    );
    ::metrics::gauge!("circuit_breaker_state").set(CircuitState::Closed as u8 as f64);

    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(route: &'static str, status: u16, start: Instant) {
    ::metrics::counter!(
        "proxy_requests_total",
        "route" => route,
        "status" => status.to_string()
    )
    .increment(1);
    ::metrics::histogram!("proxy_request_duration_seconds", "route" => route)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_upstream_attempt(outcome: &'static str) {
    ::metrics::counter!("upstream_attempts_total", "outcome" => outcome).increment(1);
}

pub fn record_retry() {
    ::metrics::counter!("upstream_retries_total").increment(1);
}

pub fn record_circuit_transition(to: CircuitState) {
    ::metrics::gauge!("circuit_breaker_state").set(to as u8 as f64);
    ::metrics::counter!("circuit_breaker_transitions_total", "to" => to.as_str()).increment(1);
}
