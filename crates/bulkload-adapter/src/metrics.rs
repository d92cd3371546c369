use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{
    core::Collector, histogram_opts, opts, HistogramVec, IntCounterVec, Registry,
};
use tracing::error;

lazy_static! {
    static ref TRANSFER_ROWS_TOTAL: IntCounterVec = IntCounterVec::new(
        opts!("bluegreen_transfer_rows_total", "Rows uploaded grouped by entity"),
        &["entity"]
    )
    .unwrap();
    static ref TRANSFER_BYTES_TOTAL: IntCounterVec = IntCounterVec::new(
        opts!("bluegreen_transfer_bytes_total", "Bytes uploaded grouped by entity"),
        &["entity"]
    )
    .unwrap();
    static ref TRANSFER_DURATION: HistogramVec = HistogramVec::new(
        histogram_opts!(
            "bluegreen_transfer_duration_seconds",
            "Latency of a single fragment upload",
            vec![0.05, 0.25, 1.0, 5.0, 15.0, 60.0, 300.0]
        ),
        &["entity"]
    )
    .unwrap();
    static ref FAN_OUT_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        opts!(
            "bluegreen_fan_out_failures_total",
            "Transfer fan-outs that failed or timed out"
        ),
        &["entity"]
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register bulkload metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, TRANSFER_ROWS_TOTAL.clone());
    register(registry, TRANSFER_BYTES_TOTAL.clone());
    register(registry, TRANSFER_DURATION.clone());
    register(registry, FAN_OUT_FAILURES_TOTAL.clone());
}

pub fn record_transfer(entity: &str, rows: u64, bytes: u64, duration: Duration) {
    TRANSFER_ROWS_TOTAL.with_label_values(&[entity]).inc_by(rows);
    TRANSFER_BYTES_TOTAL.with_label_values(&[entity]).inc_by(bytes);
    TRANSFER_DURATION
        .with_label_values(&[entity])
        .observe(duration.as_secs_f64());
}

pub fn record_fan_out_failure(entity: &str) {
    FAN_OUT_FAILURES_TOTAL.with_label_values(&[entity]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_counters_accumulate() {
        let before = TRANSFER_ROWS_TOTAL.with_label_values(&["node"]).get();
        record_transfer("node", 10, 400, Duration::from_millis(20));
        assert!(TRANSFER_ROWS_TOTAL.with_label_values(&["node"]).get() >= before + 10);
    }
}
