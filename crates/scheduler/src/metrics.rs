use lazy_static::lazy_static;
use prometheus::{core::Collector, IntCounter, IntGauge, Registry};
use tracing::error;

lazy_static! {
    static ref TASKS_DISCOVERED: IntCounter = IntCounter::new(
        "bluegreen_tasks_discovered_total",
        "Snapshots discovered and enqueued"
    )
    .unwrap();
    static ref TASKS_COMPLETED: IntCounter =
        IntCounter::new("bluegreen_tasks_completed_total", "Loads completed").unwrap();
    static ref TASKS_FAILED: IntCounter = IntCounter::new(
        "bluegreen_tasks_failed_total",
        "Loads failed permanently"
    )
    .unwrap();
    static ref TASKS_RETRIED: IntCounter =
        IntCounter::new("bluegreen_tasks_retried_total", "Load retries scheduled").unwrap();
    static ref TASKS_DEFERRED: IntCounter = IntCounter::new(
        "bluegreen_tasks_deferred_total",
        "Tasks requeued because the health gate refused them"
    )
    .unwrap();
    static ref QUEUE_DEPTH: IntGauge =
        IntGauge::new("bluegreen_queue_depth", "Tasks waiting in the queue").unwrap();
    static ref RETRIES_PENDING: IntGauge = IntGauge::new(
        "bluegreen_retries_pending",
        "Tasks waiting for their backoff to elapse"
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register scheduler metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, TASKS_DISCOVERED.clone());
    register(registry, TASKS_COMPLETED.clone());
    register(registry, TASKS_FAILED.clone());
    register(registry, TASKS_RETRIED.clone());
    register(registry, TASKS_DEFERRED.clone());
    register(registry, QUEUE_DEPTH.clone());
    register(registry, RETRIES_PENDING.clone());
}

pub fn record_discovered() {
    TASKS_DISCOVERED.inc();
}

pub fn record_completed() {
    TASKS_COMPLETED.inc();
}

pub fn record_failed() {
    TASKS_FAILED.inc();
}

pub fn record_retried() {
    TASKS_RETRIED.inc();
}

pub fn record_deferred() {
    TASKS_DEFERRED.inc();
}

pub fn set_queue_depth(depth: usize) {
    QUEUE_DEPTH.set(depth as i64);
}

pub fn set_retries_pending(pending: usize) {
    RETRIES_PENDING.set(pending as i64);
}
