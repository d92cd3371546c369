use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::control::ControlPlane;
use crate::metrics;

/// Pass/fail verdict with a human-readable reason.
#[derive(Clone, Debug, PartialEq)]
pub struct HealthVerdict {
    pub healthy: bool,
    pub reason: String,
}

impl HealthVerdict {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            reason: "healthy".to_string(),
        }
    }

    pub fn unhealthy(reason: impl Into<String>) -> Self {
        Self {
            healthy: false,
            reason: reason.into(),
        }
    }
}

/// Admission check consulted before every load.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> HealthVerdict;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HealthThresholds {
    pub max_generations: usize,
    pub heap_threshold_percent: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            max_generations: 50,
            heap_threshold_percent: 85.0,
        }
    }
}

/// Liveness, capacity and heap-pressure gate over the control plane.
pub struct HealthGate {
    control: Arc<dyn ControlPlane>,
    thresholds: HealthThresholds,
}

impl HealthGate {
    pub fn new(control: Arc<dyn ControlPlane>, thresholds: HealthThresholds) -> Self {
        Self {
            control,
            thresholds,
        }
    }

    async fn evaluate(&self) -> HealthVerdict {
        if let Err(err) = self.control.ping().await {
            return HealthVerdict::unhealthy(format!("health check failed: {err}"));
        }

        let count = match self.control.list_generations().await {
            Ok(generations) => generations.len(),
            Err(err) => return HealthVerdict::unhealthy(format!("health check failed: {err}")),
        };
        metrics::set_generation_count(count);
        if count >= self.thresholds.max_generations {
            return HealthVerdict::unhealthy(format!(
                "Too many databases ({} >= {})",
                count, self.thresholds.max_generations
            ));
        }

        match self.control.heap_usage().await {
            Ok(Some(heap)) => {
                let percent = heap.percent();
                if percent >= self.thresholds.heap_threshold_percent {
                    return HealthVerdict::unhealthy(format!(
                        "Memory usage too high - heap: {:.1}% (threshold: {}%)",
                        percent, self.thresholds.heap_threshold_percent
                    ));
                }
            }
            Ok(None) => debug!(target: "registry", "heap telemetry not exposed; skipping"),
            Err(err) => debug!(target: "registry", error = %err, "heap probe failed; skipping"),
        }

        HealthVerdict::healthy()
    }
}

#[async_trait]
impl HealthProbe for HealthGate {
    async fn check(&self) -> HealthVerdict {
        let verdict = self.evaluate().await;
        metrics::record_health(verdict.healthy);
        if !verdict.healthy {
            warn!(target: "registry", reason = %verdict.reason, "target system unhealthy");
        }
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryControlPlane;
    use bluegreen_core_types::HeapUsage;

    fn gate(control: Arc<InMemoryControlPlane>, max: usize, heap: f64) -> HealthGate {
        HealthGate::new(
            control,
            HealthThresholds {
                max_generations: max,
                heap_threshold_percent: heap,
            },
        )
    }

    #[tokio::test]
    async fn healthy_without_heap_telemetry() {
        let control = Arc::new(InMemoryControlPlane::new());
        control.add_generation("acme-100", "online");
        let verdict = gate(control, 50, 85.0).check().await;
        assert!(verdict.healthy, "{}", verdict.reason);
    }

    #[tokio::test]
    async fn rejects_when_generation_ceiling_reached() {
        let control = Arc::new(InMemoryControlPlane::new());
        control.add_generation("acme-100", "online");
        control.add_generation("acme-200", "online");
        let verdict = gate(control, 2, 85.0).check().await;
        assert!(!verdict.healthy);
        assert_eq!(verdict.reason, "Too many databases (2 >= 2)");
    }

    #[tokio::test]
    async fn rejects_on_heap_pressure() {
        let control = Arc::new(InMemoryControlPlane::new());
        control.set_heap(Some(HeapUsage {
            used_bytes: 90,
            max_bytes: 100,
        }));
        let verdict = gate(control, 50, 85.0).check().await;
        assert!(!verdict.healthy);
        assert_eq!(
            verdict.reason,
            "Memory usage too high - heap: 90.0% (threshold: 85%)"
        );
    }

    #[tokio::test]
    async fn heap_below_threshold_passes() {
        let control = Arc::new(InMemoryControlPlane::new());
        control.set_heap(Some(HeapUsage {
            used_bytes: 50,
            max_bytes: 100,
        }));
        assert!(gate(control, 50, 85.0).check().await.healthy);
    }

    #[tokio::test]
    async fn liveness_failure_is_reported_with_cause() {
        let control = Arc::new(InMemoryControlPlane::new());
        control.set_reachable(false);
        let verdict = gate(control, 50, 85.0).check().await;
        assert!(!verdict.healthy);
        assert!(verdict.reason.starts_with("health check failed: "));
        assert!(verdict.reason.contains("connection refused"));
    }
}
