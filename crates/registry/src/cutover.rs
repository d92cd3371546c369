use std::sync::Arc;

use tracing::{debug, error, info};

use bluegreen_core_types::{BlueGreenError, GenerationName, TenantId};

use crate::control::{tenant_generations, ControlPlane};
use crate::metrics;

/// Repoints a tenant alias at a generation.
#[derive(Clone)]
pub struct AliasCutover {
    control: Arc<dyn ControlPlane>,
}

impl AliasCutover {
    pub fn new(control: Arc<dyn ControlPlane>) -> Self {
        Self { control }
    }

    /// Generation the tenant alias currently resolves to.
    pub async fn current_target(
        &self,
        tenant: &TenantId,
    ) -> Result<Option<GenerationName>, BlueGreenError> {
        Ok(self
            .control
            .list_aliases()
            .await?
            .into_iter()
            .find(|alias| alias.name == tenant.as_str())
            .map(|alias| alias.target))
    }

    /// True when `timestamp` is newer than every other generation of `tenant`.
    ///
    /// Re-reads the live generation list on every call.
    pub async fn is_latest(&self, tenant: &TenantId, timestamp: u64) -> Result<bool, BlueGreenError> {
        let generations = tenant_generations(self.control.as_ref(), tenant).await?;
        Ok(generations
            .iter()
            .filter(|(ts, _)| *ts != timestamp)
            .all(|(ts, _)| *ts < timestamp))
    }

    /// Drop any existing alias for `tenant`, then point it at `target`.
    ///
    /// Failures are logged and reported as `false`.
    pub async fn set_alias(&self, tenant: &TenantId, target: &GenerationName) -> bool {
        let result = self.repoint(tenant, target).await;
        metrics::record_cutover(result.is_ok());
        match result {
            Ok(()) => {
                info!(target: "registry", tenant = %tenant, generation = %target, "alias repointed");
                true
            }
            Err(err) => {
                error!(
                    target: "registry",
                    tenant = %tenant,
                    generation = %target,
                    error = %err,
                    "alias cutover failed"
                );
                false
            }
        }
    }

    async fn repoint(&self, tenant: &TenantId, target: &GenerationName) -> Result<(), BlueGreenError> {
        let exists = self
            .control
            .list_generations()
            .await?
            .iter()
            .any(|record| &record.name == target);
        if !exists {
            return Err(BlueGreenError::not_found(format!(
                "generation {target} is not registered"
            )));
        }

        match self.control.drop_alias(tenant.as_str()).await {
            Ok(()) => debug!(target: "registry", tenant = %tenant, "dropped previous alias"),
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                debug!(target: "registry", tenant = %tenant, error = %err, "drop alias failed; continuing")
            }
        }
        self.control.create_alias(tenant.as_str(), target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryControlPlane;

    #[tokio::test]
    async fn set_alias_replaces_prior_mapping() {
        let control = Arc::new(InMemoryControlPlane::new());
        control.add_generation("acme-100", "online");
        control.add_generation("acme-200", "online");
        control.point_alias("acme", "acme-100");

        let cutover = AliasCutover::new(control.clone());
        assert!(cutover.set_alias(&TenantId::new("acme"), &"acme-200".into()).await);
        assert_eq!(control.alias_target("acme").as_deref(), Some("acme-200"));
    }

    #[tokio::test]
    async fn set_alias_without_prior_alias() {
        let control = Arc::new(InMemoryControlPlane::new());
        control.add_generation("acme-100", "online");
        let cutover = AliasCutover::new(control.clone());
        assert!(cutover.set_alias(&TenantId::new("acme"), &"acme-100".into()).await);
        assert_eq!(
            cutover.current_target(&TenantId::new("acme")).await.unwrap(),
            Some(GenerationName::from("acme-100"))
        );
    }

    #[tokio::test]
    async fn set_alias_to_missing_generation_fails_and_keeps_alias() {
        let control = Arc::new(InMemoryControlPlane::new());
        control.add_generation("acme-100", "online");
        control.point_alias("acme", "acme-100");
        let cutover = AliasCutover::new(control.clone());
        assert!(!cutover.set_alias(&TenantId::new("acme"), &"acme-300".into()).await);
        assert_eq!(control.alias_target("acme").as_deref(), Some("acme-100"));
    }

    #[tokio::test]
    async fn is_latest_requires_strict_maximum() {
        let control = Arc::new(InMemoryControlPlane::new());
        control.add_generation("acme-100", "online");
        control.add_generation("acme-200", "online");
        control.add_generation("globex-900", "online");
        let cutover = AliasCutover::new(control.clone());
        let tenant = TenantId::new("acme");
        assert!(cutover.is_latest(&tenant, 200).await.unwrap());
        assert!(!cutover.is_latest(&tenant, 100).await.unwrap());
        assert!(cutover.is_latest(&TenantId::new("initech"), 5).await.unwrap());
    }
}
