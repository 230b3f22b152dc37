use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};
use std::sync::LazyLock;

pub static NOTIFICATIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "paytr_notifications_total",
        "Gateway notifications recorded, by outcome",
        &["outcome"]
    )
    .unwrap()
});

pub static MALFORMED_NOTIFICATIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "paytr_notifications_malformed_total",
        "Gateway notifications acknowledged without processing",
        &["reason"]
    )
    .unwrap()
});

pub static SIGNATURE_CHECKS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "paytr_signature_checks_total",
        "Notification signature checks",
        &["result"]
    )
    .unwrap()
});

pub static REDIRECTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "paytr_redirects_total",
        "Browser redirects resolved, by decision and the rule that produced it",
        &["decision", "basis"]
    )
    .unwrap()
});

pub static REDIRECT_LATENCY: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "paytr_redirect_resolve_seconds",
        "Time spent resolving a browser redirect",
        &["decision"],
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0]
    )
    .unwrap()
});

pub static ORDER_FORWARDS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "paytr_order_forwards_total",
        "Order system forwards, by result",
        &["result"]
    )
    .unwrap()
});

pub fn metrics_output() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
