// Prometheus metrics for webhook dispatch
//
// Tracks:
// - Deliveries by outcome (counter)
// - Delivery durations (histogram)
// - Whole-job reschedules (counter)
// - Audit log evictions (counter)

use lazy_static::lazy_static;
use prometheus::{Encoder, Histogram, IntCounter, IntCounterVec, Registry, TextEncoder};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    // Delivery metrics
    pub static ref DELIVERIES_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("webhook_deliveries_total", "Webhook deliveries by outcome"),
        &["outcome"]
    ).expect("Failed to create deliveries metric");

    pub static ref DELIVERY_DURATION_SECONDS: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "webhook_delivery_duration_seconds",
            "Duration of webhook HTTP deliveries"
        ),
    ).expect("Failed to create delivery duration metric");

    // Job metrics
    pub static ref JOB_RESCHEDULES_TOTAL: IntCounter = IntCounter::new(
        "webhook_job_reschedules_total",
        "Total number of whole-job retry reschedules"
    ).expect("Failed to create job reschedules metric");

    // Audit log metrics
    pub static ref LOG_EVICTIONS_TOTAL: IntCounter = IntCounter::new(
        "webhook_log_evictions_total",
        "Delivery log records evicted by the per-webhook cap"
    ).expect("Failed to create log evictions metric");
}

/// Register all dispatch metrics with the shared registry.
/// Safe to call once at startup; duplicate registration is reported.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(DELIVERIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DELIVERY_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(JOB_RESCHEDULES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(LOG_EVICTIONS_TOTAL.clone()))?;
    Ok(())
}

/// Render the current metrics in Prometheus text exposition format.
/// Exposition transport (HTTP endpoint, push gateway) is a host concern.
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}
