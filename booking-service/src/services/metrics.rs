use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

use crate::models::PaymentProvider;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_metrics() {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    if METRICS_HANDLE.set(handle).is_err() {
        panic!("failed to set metrics handle: already initialized");
    }
}

pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

pub fn record_booking_created() {
    metrics::counter!("bookings_created_total").increment(1);
}

pub fn record_booking_rejected(reason: &'static str) {
    metrics::counter!("booking_rejections_total", "reason" => reason).increment(1);
}

pub fn record_charge_initiated(provider: PaymentProvider) {
    metrics::counter!("payment_charges_total", "provider" => provider.as_str()).increment(1);
}

pub fn record_payment_event(provider: PaymentProvider, outcome: &'static str) {
    metrics::counter!(
        "payment_events_total",
        "provider" => provider.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_webhook_rejected(provider: PaymentProvider) {
    metrics::counter!("webhook_rejections_total", "provider" => provider.as_str()).increment(1);
}

pub fn record_sweep_run(task: &'static str, ok: bool, items: u64) {
    let result = if ok { "ok" } else { "error" };
    metrics::counter!("sweep_runs_total", "task" => task, "result" => result).increment(1);
    if items > 0 {
        metrics::counter!("sweep_items_total", "task" => task).increment(items);
    }
}
