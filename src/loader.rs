use async_trait::async_trait;

use bluegreen_core_types::{BlueGreenError, LoadReport, LoadTask};
use bluegreen_scheduler::SnapshotLoader;
use bulkload_adapter::BulkLoader;

/// Loads a discovered snapshot through the Arrow Flight bulk-load path.
pub struct ArrowSnapshotLoader {
    loader: BulkLoader,
}

impl ArrowSnapshotLoader {
    pub fn new(loader: BulkLoader) -> Self {
        Self { loader }
    }
}

#[async_trait]
impl SnapshotLoader for ArrowSnapshotLoader {
    async fn load(&self, task: &LoadTask) -> Result<LoadReport, BlueGreenError> {
        self.loader
            .load_generation(task.tenant(), task.timestamp(), &task.data_path)
            .await
    }
}
