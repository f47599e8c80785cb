//! Prometheus metrics for the host
//!
//! All metrics live in the default registry and are exposed in text format
//! by the host at `GET /metrics`.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};

lazy_static! {
    /// Commands executed on the main loop, by result ("success" / "failure")
    pub static ref COMMANDS_TOTAL: CounterVec = register_counter_vec!(
        "tickbridge_commands_total",
        "Commands executed on the main loop",
        &["result"]
    )
    .expect("metric can be registered");

    /// Time spent inside a single invocation
    pub static ref COMMAND_DURATION: Histogram = register_histogram!(
        "tickbridge_command_duration_seconds",
        "Wall time of one procedure invocation",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]
    )
    .expect("metric can be registered");

    /// Commands waiting for a tick
    pub static ref QUEUE_DEPTH: Gauge = register_gauge!(
        "tickbridge_queue_depth",
        "Commands waiting in the queue"
    )
    .expect("metric can be registered");

    /// Request handlers blocked on a completion signal
    pub static ref HANDLERS_WAITING: Gauge = register_gauge!(
        "tickbridge_handlers_waiting",
        "Request handlers waiting for their command to complete"
    )
    .expect("metric can be registered");

    /// Readiness probes answered
    pub static ref STATUS_PROBES_TOTAL: Counter = register_counter!(
        "tickbridge_status_probes_total",
        "Status probes answered by the host"
    )
    .expect("metric can be registered");

    /// HTTP requests by method and status code
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "tickbridge_http_requests_total",
        "HTTP requests handled by the host",
        &["method", "status"]
    )
    .expect("metric can be registered");
}

/// Render every registered metric in Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!("failed to encode metrics: {e}");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
