use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    saturated: AtomicU64,
    rejected_stopped: AtomicU64,
    started: AtomicU64,
    completed: AtomicU64,
    cancelled: AtomicU64,
    panicked: AtomicU64,
    rate_limited: AtomicU64,
}

static COUNTERS: Lazy<Counters> = Lazy::new(Counters::default);

fn increment(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub fn record_submitted() {
    increment(&COUNTERS.submitted);
}

pub fn record_saturated() {
    increment(&COUNTERS.saturated);
}

pub fn record_rejected_stopped() {
    increment(&COUNTERS.rejected_stopped);
}

pub fn record_started() {
    increment(&COUNTERS.started);
}

pub fn record_completed() {
    increment(&COUNTERS.completed);
}

pub fn record_cancelled() {
    increment(&COUNTERS.cancelled);
}

pub fn record_panicked() {
    increment(&COUNTERS.panicked);
}

pub fn record_rate_limited() {
    increment(&COUNTERS.rate_limited);
}

#[derive(Clone, Debug, Default)]
pub struct SchedulerMetricsSnapshot {
    pub submitted: u64,
    pub saturated: u64,
    pub rejected_stopped: u64,
    pub started: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub panicked: u64,
    pub rate_limited: u64,
}

pub fn snapshot() -> SchedulerMetricsSnapshot {
    SchedulerMetricsSnapshot {
        submitted: COUNTERS.submitted.load(Ordering::Relaxed),
        saturated: COUNTERS.saturated.load(Ordering::Relaxed),
        rejected_stopped: COUNTERS.rejected_stopped.load(Ordering::Relaxed),
        started: COUNTERS.started.load(Ordering::Relaxed),
        completed: COUNTERS.completed.load(Ordering::Relaxed),
        cancelled: COUNTERS.cancelled.load(Ordering::Relaxed),
        panicked: COUNTERS.panicked.load(Ordering::Relaxed),
        rate_limited: COUNTERS.rate_limited.load(Ordering::Relaxed),
    }
}
