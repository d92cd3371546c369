use async_trait::async_trait;

use bluegreen_core_types::{BlueGreenError, LoadReport, LoadTask};

/// Performs the full load of one snapshot into a fresh generation.
#[async_trait]
pub trait SnapshotLoader: Send + Sync {
    async fn load(&self, task: &LoadTask) -> Result<LoadReport, BlueGreenError>;
}
