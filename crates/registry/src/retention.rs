use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use bluegreen_core_types::{BlueGreenError, GenerationName, TenantId};

use crate::control::{tenant_generations, ControlPlane};
use crate::metrics;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RetentionReport {
    pub retained: Vec<GenerationName>,
    /// Older than the window but still aliased.
    pub protected: Vec<GenerationName>,
    pub deleted: Vec<GenerationName>,
    pub failed: Vec<GenerationName>,
}

/// Keeps the newest generations of a tenant plus whatever is aliased.
#[derive(Clone)]
pub struct RetentionGc {
    control: Arc<dyn ControlPlane>,
}

impl RetentionGc {
    pub fn new(control: Arc<dyn ControlPlane>) -> Self {
        Self { control }
    }

    pub async fn cleanup(
        &self,
        tenant: &TenantId,
        keep_count: usize,
    ) -> Result<RetentionReport, BlueGreenError> {
        let generations = tenant_generations(self.control.as_ref(), tenant).await?;
        let mut report = RetentionReport::default();
        if generations.len() <= keep_count {
            report.retained = generations.into_iter().map(|(_, g)| g.name).collect();
            return Ok(report);
        }

        let aliased: HashSet<GenerationName> = self
            .control
            .list_aliases()
            .await?
            .into_iter()
            .map(|alias| alias.target)
            .collect();

        for (rank, (_, generation)) in generations.into_iter().enumerate() {
            let name = generation.name;
            if rank < keep_count {
                report.retained.push(name);
                continue;
            }
            if aliased.contains(&name) {
                info!(target: "registry", tenant = %tenant, generation = %name, "keeping aliased generation");
                report.protected.push(name);
                continue;
            }
            match self.control.drop_generation(&name).await {
                Ok(()) => {
                    metrics::record_generation_dropped();
                    info!(target: "registry", tenant = %tenant, generation = %name, "dropped old generation");
                    report.deleted.push(name);
                }
                Err(err) => {
                    warn!(
                        target: "registry",
                        tenant = %tenant,
                        generation = %name,
                        error = %err,
                        "failed to drop old generation"
                    );
                    report.failed.push(name);
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryControlPlane;

    fn names(list: &[GenerationName]) -> Vec<&str> {
        list.iter().map(GenerationName::as_str).collect()
    }

    #[tokio::test]
    async fn keeps_newest_and_deletes_rest() {
        let control = Arc::new(InMemoryControlPlane::new());
        for name in ["acme-50", "acme-100", "acme-200", "acme-bogus", "globex-1"] {
            control.add_generation(name, "online");
        }
        control.point_alias("acme", "acme-200");

        let report = RetentionGc::new(control.clone())
            .cleanup(&TenantId::new("acme"), 2)
            .await
            .unwrap();
        assert_eq!(names(&report.retained), vec!["acme-200", "acme-100"]);
        assert_eq!(names(&report.deleted), vec!["acme-50"]);
        assert_eq!(
            control.generation_names(),
            vec!["acme-100", "acme-200", "acme-bogus", "globex-1"]
        );
    }

    #[tokio::test]
    async fn never_deletes_aliased_generation_outside_window() {
        let control = Arc::new(InMemoryControlPlane::new());
        for name in ["acme-10", "acme-20", "acme-30", "acme-40"] {
            control.add_generation(name, "online");
        }
        control.point_alias("acme", "acme-10");

        let report = RetentionGc::new(control.clone())
            .cleanup(&TenantId::new("acme"), 2)
            .await
            .unwrap();
        assert_eq!(names(&report.protected), vec!["acme-10"]);
        assert_eq!(names(&report.deleted), vec!["acme-20"]);
        assert!(control.generation_names().contains(&"acme-10".to_string()));
    }

    #[tokio::test]
    async fn drop_failure_does_not_stop_the_pass() {
        let control = Arc::new(InMemoryControlPlane::new());
        for name in ["acme-1", "acme-2", "acme-3", "acme-4"] {
            control.add_generation(name, "online");
        }
        control.fail_drops_of("acme-2");

        let report = RetentionGc::new(control.clone())
            .cleanup(&TenantId::new("acme"), 2)
            .await
            .unwrap();
        assert_eq!(names(&report.failed), vec!["acme-2"]);
        assert_eq!(names(&report.deleted), vec!["acme-1"]);
    }
}
