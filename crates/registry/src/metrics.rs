use lazy_static::lazy_static;
use prometheus::{core::Collector, opts, IntCounter, IntCounterVec, IntGauge, Registry};
use tracing::error;

lazy_static! {
    static ref HEALTH_CHECKS_TOTAL: IntCounterVec = IntCounterVec::new(
        opts!(
            "bluegreen_health_checks_total",
            "Health gate verdicts grouped by outcome"
        ),
        &["outcome"]
    )
    .unwrap();
    static ref GENERATIONS_ACTIVE: IntGauge = IntGauge::new(
        "bluegreen_generations_active",
        "Generations reported by the target at the last health check"
    )
    .unwrap();
    static ref CUTOVER_TOTAL: IntCounter =
        IntCounter::new("bluegreen_cutover_total", "Successful alias cutovers").unwrap();
    static ref CUTOVER_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "bluegreen_cutover_failures_total",
        "Alias cutovers that failed"
    )
    .unwrap();
    static ref GENERATIONS_DROPPED_TOTAL: IntCounter = IntCounter::new(
        "bluegreen_generations_dropped_total",
        "Generations removed by retention"
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register registry metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, HEALTH_CHECKS_TOTAL.clone());
    register(registry, GENERATIONS_ACTIVE.clone());
    register(registry, CUTOVER_TOTAL.clone());
    register(registry, CUTOVER_FAILURES_TOTAL.clone());
    register(registry, GENERATIONS_DROPPED_TOTAL.clone());
}

pub fn record_health(healthy: bool) {
    let outcome = if healthy { "healthy" } else { "unhealthy" };
    HEALTH_CHECKS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn set_generation_count(count: usize) {
    GENERATIONS_ACTIVE.set(count as i64);
}

pub fn record_cutover(success: bool) {
    if success {
        CUTOVER_TOTAL.inc();
    } else {
        CUTOVER_FAILURES_TOTAL.inc();
    }
}

pub fn record_generation_dropped() {
    GENERATIONS_DROPPED_TOTAL.inc();
}
