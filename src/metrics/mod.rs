use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};
use std::time::Instant;
use tracing::trace;

lazy_static! {
    // HTTP metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounter = register_int_counter!(
        "http_requests_total",
        "Total number of HTTP requests"
    ).unwrap();

    pub static ref HTTP_REQUESTS_ERROR: IntCounter = register_int_counter!(
        "http_requests_error_total",
        "Total number of HTTP requests answered with a 5xx"
    ).unwrap();

    pub static ref HTTP_REQUEST_DURATION: Histogram = register_histogram!(
        "http_request_duration_seconds",
        "HTTP request latencies in seconds"
    ).unwrap();

    // Business metrics
    pub static ref CHECKOUT_SESSIONS_CREATED: IntCounter = register_int_counter!(
        "checkout_sessions_created_total",
        "Total number of checkout sessions created"
    ).unwrap();

    pub static ref CHECKOUT_SESSION_FAILURES: IntCounter = register_int_counter!(
        "checkout_session_failures_total",
        "Checkout attempts that failed before a session was persisted"
    ).unwrap();

    pub static ref CHECKOUT_TRANSITIONS: IntCounterVec = register_int_counter_vec!(
        "checkout_transitions_total",
        "Checkout status transitions applied, by target status",
        &["status"]
    ).unwrap();

    pub static ref PAYMENT_NOTIFICATIONS: IntCounterVec = register_int_counter_vec!(
        "payment_notifications_total",
        "Payment gateway notifications received, by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref ORDERS_CREATED: IntCounter = register_int_counter!(
        "orders_created_total",
        "Total number of orders created"
    ).unwrap();

    pub static ref FULFILLMENT_FAILURES: IntCounter = register_int_counter!(
        "checkout_fulfillment_failures_total",
        "Settled checkouts whose order could not be created"
    ).unwrap();
}

/// Record HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, started: Instant) {
    HTTP_REQUESTS_TOTAL.inc();

    trace!(
        http.method = method,
        http.path = path,
        http.status = status,
        latency_secs = started.elapsed().as_secs_f64(),
        "recording HTTP request metrics"
    );

    if status >= 500 {
        HTTP_REQUESTS_ERROR.inc();
    }

    HTTP_REQUEST_DURATION.observe(started.elapsed().as_secs_f64());
}

pub fn record_transition(status: &str) {
    CHECKOUT_TRANSITIONS.with_label_values(&[status]).inc();
}

pub fn record_notification(outcome: &str) {
    PAYMENT_NOTIFICATIONS.with_label_values(&[outcome]).inc();
}

/// Gather all metrics and return as Prometheus text format
pub fn gather_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
