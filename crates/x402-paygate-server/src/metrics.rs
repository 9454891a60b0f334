use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};
use std::sync::LazyLock;

pub static REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "x402_paygate_requests_total",
        "Total HTTP requests",
        &["endpoint", "status"]
    )
    .unwrap()
});

pub static CHALLENGES_ISSUED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "x402_paygate_challenges_issued_total",
        "Total challenges issued"
    )
    .unwrap()
});

pub static PROOF_OUTCOMES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "x402_paygate_proofs_total",
        "Payment proof submissions by outcome",
        &["result"]
    )
    .unwrap()
});

pub static PROOF_LATENCY: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "x402_paygate_proof_latency_seconds",
        "Time to verify and settle a payment proof",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .unwrap()
});

pub static ACCESS_CHECKS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "x402_paygate_access_checks_total",
        "Gated content access checks by outcome",
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
