use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::metrics;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatsSnapshot {
    pub discovered: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub deferred: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

impl StatsSnapshot {
    /// Completed loads as a percentage of discovered snapshots.
    pub fn success_rate(&self) -> f64 {
        self.completed as f64 / self.discovered.max(1) as f64 * 100.0
    }
}

/// Orchestrator counters shared by the watcher and every worker.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    inner: Mutex<StatsSnapshot>,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, apply: impl FnOnce(&mut StatsSnapshot)) {
        let mut stats = self.inner.lock();
        apply(&mut stats);
        stats.last_activity = Some(Utc::now());
    }

    pub fn record_discovered(&self) {
        self.update(|s| s.discovered += 1);
        metrics::record_discovered();
    }

    pub fn record_completed(&self) {
        self.update(|s| s.completed += 1);
        metrics::record_completed();
    }

    pub fn record_failed(&self) {
        self.update(|s| s.failed += 1);
        metrics::record_failed();
    }

    pub fn record_retried(&self) {
        self.update(|s| s.retried += 1);
        metrics::record_retried();
    }

    pub fn record_deferred(&self) {
        self.update(|s| s.deferred += 1);
        metrics::record_deferred();
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_guards_against_zero_discoveries() {
        let stats = StatsRecorder::new();
        assert_eq!(stats.snapshot().success_rate(), 0.0);
        assert!(stats.snapshot().last_activity.is_none());

        stats.record_discovered();
        stats.record_discovered();
        stats.record_completed();
        stats.record_retried();
        let snap = stats.snapshot();
        assert_eq!(snap.discovered, 2);
        assert_eq!(snap.retried, 1);
        assert!((snap.success_rate() - 50.0).abs() < f64::EPSILON);
        assert!(snap.last_activity.is_some());
    }
}
