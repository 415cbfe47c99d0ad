//! Metrics module for billing-service.
//! Provides Prometheus metrics for bill generation, payments and the ledger mirror.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_counter, register_histogram_vec, register_int_counter_vec,
    Counter, Encoder, HistogramVec, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Store operation duration histogram
pub static STORE_OPERATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "billing_store_operation_duration_seconds",
            "Store operation duration"
        ),
        &["operation"]
    )
    .expect("Failed to register STORE_OPERATION_DURATION")
});

/// Bills written by monthly generation, by outcome (created, updated, failed)
pub static BILLS_GENERATED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "billing_bills_generated_total",
            "Bills processed by monthly generation by outcome"
        ),
        &["outcome"]
    )
    .expect("Failed to register BILLS_GENERATED_TOTAL")
});

/// Payments recorded by method
pub static PAYMENTS_RECORDED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("billing_payments_recorded_total", "Payments recorded by method"),
        &["method"]
    )
    .expect("Failed to register PAYMENTS_RECORDED_TOTAL")
});

/// Sum of recorded payment amounts
pub static PAYMENT_AMOUNT_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(opts!(
        "billing_payment_amount_total",
        "Total amount collected through recorded payments"
    ))
    .expect("Failed to register PAYMENT_AMOUNT_TOTAL")
});

/// Ledger mirror outcomes (applied, skipped_zero, no_account, queued, lost)
pub static LEDGER_MIRROR_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "billing_ledger_mirror_total",
            "Receivable ledger mirror attempts by outcome"
        ),
        &["outcome"]
    )
    .expect("Failed to register LEDGER_MIRROR_TOTAL")
});

static HTTP_RECORDER: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Initialize all metrics. Safe to call more than once.
pub fn init_metrics() {
    // HTTP middleware metrics go through the `metrics` facade. Installing the
    // recorder fails if another one is already global; that is not fatal.
    HTTP_RECORDER.get_or_init(|| match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "HTTP metrics recorder not installed");
            None
        }
    });

    // Force initialization of lazy statics
    let _ = &*STORE_OPERATION_DURATION;
    let _ = &*BILLS_GENERATED_TOTAL;
    let _ = &*PAYMENTS_RECORDED_TOTAL;
    let _ = &*PAYMENT_AMOUNT_TOTAL;
    let _ = &*LEDGER_MIRROR_TOTAL;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
    }
    let mut output = String::from_utf8_lossy(&buffer).into_owned();

    if let Some(Some(handle)) = HTTP_RECORDER.get() {
        output.push_str(&handle.render());
    }
    output
}

/// Record the outcome of one customer's bill generation.
pub fn record_bill_generated(outcome: &str) {
    BILLS_GENERATED_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a payment and its amount.
pub fn record_payment(method: &str, amount: f64) {
    PAYMENTS_RECORDED_TOTAL.with_label_values(&[method]).inc();
    PAYMENT_AMOUNT_TOTAL.inc_by(amount.abs());
}

/// Record a ledger mirror outcome.
pub fn record_ledger_mirror(outcome: &str) {
    LEDGER_MIRROR_TOTAL.with_label_values(&[outcome]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent_and_metrics_render() {
        init_metrics();
        init_metrics();
        record_bill_generated("created");
        record_ledger_mirror("applied");

        let text = get_metrics();
        assert!(text.contains("billing_bills_generated_total"));
        assert!(text.contains("billing_ledger_mirror_total"));
    }
}
