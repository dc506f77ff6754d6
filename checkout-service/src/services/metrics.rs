//! Prometheus metrics for checkout operations and webhook reconciliation.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "checkout_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Gateway round-trip duration histogram
pub static GATEWAY_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "checkout_gateway_request_duration_seconds",
            "Payment gateway request duration"
        ),
        &["operation"]
    )
    .expect("Failed to register GATEWAY_REQUEST_DURATION")
});

/// Order operations counter
pub static ORDER_OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Webhook events counter
pub static WEBHOOK_EVENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Subscription grants counter
pub static SUBSCRIPTION_GRANTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    ORDER_OPERATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "checkout_order_operations_total",
                "Total order operations by type and outcome"
            ),
            &["operation", "outcome"]
        )
        .expect("Failed to register ORDER_OPERATIONS_TOTAL")
    });

    WEBHOOK_EVENTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "checkout_webhook_events_total",
                "Total webhook events by type and outcome"
            ),
            &["event_type", "outcome"]
        )
        .expect("Failed to register WEBHOOK_EVENTS_TOTAL")
    });

    SUBSCRIPTION_GRANTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "checkout_subscription_grants_total",
                "Subscriptions created or renewed from paid orders"
            ),
            &["interval"]
        )
        .expect("Failed to register SUBSCRIPTION_GRANTS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
    let _ = &*GATEWAY_REQUEST_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Failed to convert metrics to string")
}

/// Record an order operation.
pub fn record_order_operation(operation: &str, outcome: &str) {
    if let Some(counter) = ORDER_OPERATIONS_TOTAL.get() {
        counter.with_label_values(&[operation, outcome]).inc();
    }
}

/// Record a webhook event.
pub fn record_webhook_event(event_type: &str, outcome: &str) {
    if let Some(counter) = WEBHOOK_EVENTS_TOTAL.get() {
        counter.with_label_values(&[event_type, outcome]).inc();
    }
}

/// Record a subscription grant or renewal.
pub fn record_subscription_grant(interval: &str) {
    if let Some(counter) = SUBSCRIPTION_GRANTS_TOTAL.get() {
        counter.with_label_values(&[interval]).inc();
    }
}
