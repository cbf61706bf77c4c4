use std::time::Duration;

use appsearch_core_types::CallType;
use appsearch_registry::metrics as registry_metrics;
use lazy_static::lazy_static;
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{
    core::Collector, histogram_opts, opts, Encoder, HistogramVec, IntCounter, IntCounterVec,
    Registry, TextEncoder,
};
use tracing::error;

lazy_static! {
    static ref CALLS_ADMITTED: IntCounterVec = IntCounterVec::new(
        opts!("appsearch_calls_admitted_total", "Calls that passed the admission gate"),
        &["call_type"]
    )
    .unwrap();
    static ref CALLS_REJECTED: IntCounterVec = IntCounterVec::new(
        opts!(
            "appsearch_calls_rejected_total",
            "Calls rejected before reaching an executor, by reason"
        ),
        &["call_type", "reason"]
    )
    .unwrap();
    static ref ENTERPRISE_UNAVAILABLE: IntCounter = IntCounter::new(
        "appsearch_enterprise_unavailable_total",
        "Enterprise calls answered empty because no managed profile was available",
    )
    .unwrap();
    static ref CALL_DURATION: HistogramVec = HistogramVec::new(
        histogram_opts!(
            "appsearch_call_duration_seconds",
            "End-to-end latency of admitted calls",
            vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
        ),
        &["call_type"]
    )
    .unwrap();
}

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register service metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, CALLS_ADMITTED.clone());
    register(registry, CALLS_REJECTED.clone());
    register(registry, ENTERPRISE_UNAVAILABLE.clone());
    register(registry, CALL_DURATION.clone());
    registry_metrics::register_metrics(registry);
}

pub fn global_registry() -> &'static Registry {
    REGISTER_ONCE.get_or_init(|| register_metrics(&GLOBAL_REGISTRY));
    &GLOBAL_REGISTRY
}

/// Text exposition of the global registry.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&global_registry().gather(), &mut buffer) {
        error!(?err, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_admitted(call: CallType) {
    CALLS_ADMITTED.with_label_values(&[call.as_str()]).inc();
}

pub fn record_rejected(call: CallType, reason: &str) {
    CALLS_REJECTED
        .with_label_values(&[call.as_str(), reason])
        .inc();
}

pub fn record_enterprise_unavailable() {
    ENTERPRISE_UNAVAILABLE.inc();
}

pub fn observe_call(call: CallType, elapsed: Duration) {
    CALL_DURATION
        .with_label_values(&[call.as_str()])
        .observe(elapsed.as_secs_f64());
}
