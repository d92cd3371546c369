use async_trait::async_trait;

use bluegreen_core_types::{
    AliasRecord, BlueGreenError, GenerationName, GenerationRecord, HeapUsage, TenantId,
};

/// Admin operations against the target system.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Trivial liveness probe.
    async fn ping(&self) -> Result<(), BlueGreenError>;

    /// Every user generation (system databases excluded).
    async fn list_generations(&self) -> Result<Vec<GenerationRecord>, BlueGreenError>;

    async fn list_aliases(&self) -> Result<Vec<AliasRecord>, BlueGreenError>;

    /// Fails with `AlreadyExists` when the alias is present.
    async fn create_alias(&self, alias: &str, target: &GenerationName)
        -> Result<(), BlueGreenError>;

    /// Fails with `NotFound` when the alias is absent.
    async fn drop_alias(&self, alias: &str) -> Result<(), BlueGreenError>;

    /// Idempotent; dropping an absent generation succeeds.
    async fn drop_generation(&self, name: &GenerationName) -> Result<(), BlueGreenError>;

    /// Heap utilisation, or `None` when the target does not expose it.
    async fn heap_usage(&self) -> Result<Option<HeapUsage>, BlueGreenError>;
}

/// Generations of `tenant` with their parsed timestamps, newest first.
///
/// Names that are not `{tenant}-{digits}` are skipped.
pub async fn tenant_generations(
    control: &dyn ControlPlane,
    tenant: &TenantId,
) -> Result<Vec<(u64, GenerationRecord)>, BlueGreenError> {
    let mut generations: Vec<(u64, GenerationRecord)> = control
        .list_generations()
        .await?
        .into_iter()
        .filter_map(|record| record.name.timestamp_for(tenant).map(|ts| (ts, record)))
        .collect();
    generations.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(generations)
}

pub async fn aliases_targeting(
    control: &dyn ControlPlane,
    target: &GenerationName,
) -> Result<Vec<AliasRecord>, BlueGreenError> {
    Ok(control
        .list_aliases()
        .await?
        .into_iter()
        .filter(|alias| &alias.target == target)
        .collect())
}
