use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use bluegreen_core_types::{
    BlueGreenError, ErrorKind, GenerationName, LoadReport, RetryPolicy, TenantId,
};
use bluegreen_registry::{aliases_targeting, ControlPlane};

use crate::driver::{BulkLoadDriver, CreateDatabaseOptions, EntityKind, LoadState};
use crate::fanout::{discover_fragments, fan_out, FanOutOptions};
use crate::mapping::{map_edge_batch, map_node_batch};
use crate::transport::TransportFactory;

#[derive(Clone, Debug)]
pub struct LoaderOptions {
    pub create: CreateDatabaseOptions,
    pub create_retry: RetryPolicy,
    pub fan_out: FanOutOptions,
    /// Pause after dropping a leftover generation before recreating it.
    pub settle_delay: Duration,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            create: CreateDatabaseOptions::default(),
            create_retry: RetryPolicy::fixed(10, Duration::from_secs(3)),
            fan_out: FanOutOptions::default(),
            settle_delay: Duration::from_secs(2),
        }
    }
}

/// Runs the full load sequence for one generation.
pub struct BulkLoader {
    factory: Arc<dyn TransportFactory>,
    control: Arc<dyn ControlPlane>,
    options: LoaderOptions,
}

impl BulkLoader {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        control: Arc<dyn ControlPlane>,
        options: LoaderOptions,
    ) -> Self {
        Self {
            factory,
            control,
            options,
        }
    }

    /// Drop aliases and any leftover generation with this name from an earlier attempt.
    async fn clear_leftover(&self, generation: &GenerationName) -> Result<(), BlueGreenError> {
        let exists = self
            .control
            .list_generations()
            .await?
            .iter()
            .any(|record| &record.name == generation);
        if !exists {
            return Ok(());
        }

        warn!(target: "bulkload", generation = %generation, "generation already exists; dropping before reload");
        for alias in aliases_targeting(self.control.as_ref(), generation).await? {
            match self.control.drop_alias(&alias.name).await {
                Ok(()) => info!(target: "bulkload", alias = %alias.name, "dropped alias of leftover generation"),
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.context(format!("dropping alias {}", alias.name))),
            }
        }
        self.control.drop_generation(generation).await?;
        tokio::time::sleep(self.options.settle_delay).await;
        Ok(())
    }

    pub async fn load_generation(
        &self,
        tenant: &TenantId,
        timestamp: u64,
        data_path: &Path,
    ) -> Result<LoadReport, BlueGreenError> {
        let generation = GenerationName::new(tenant, timestamp);
        let nodes_dir = data_path.join("nodes");
        let edges_dir = data_path.join("relationships");
        if !nodes_dir.is_dir() || !edges_dir.is_dir() {
            return Err(BlueGreenError::new(ErrorKind::DataPathNotFound).with_hint(format!(
                "{} lacks nodes/ or relationships/",
                data_path.display()
            )));
        }

        self.clear_leftover(&generation).await?;

        let mut driver = BulkLoadDriver::new(self.factory.clone(), generation.clone())
            .with_create_retry(self.options.create_retry.clone());
        if !driver.abort(&generation).await {
            debug!(target: "bulkload", generation = %generation, "no running import to abort");
        }

        let result = self.stream(&mut driver, &nodes_dir, &edges_dir).await;
        if result.is_err() && driver.state() != LoadState::Ready {
            driver.abort(&generation).await;
        }
        driver.close().await;
        result
    }

    async fn stream(
        &self,
        driver: &mut BulkLoadDriver,
        nodes_dir: &Path,
        edges_dir: &Path,
    ) -> Result<LoadReport, BlueGreenError> {
        driver.create_database(&self.options.create).await?;

        let node_fragments = discover_fragments(nodes_dir)?;
        let nodes = fan_out(
            driver,
            EntityKind::Node,
            map_node_batch,
            node_fragments,
            &self.options.fan_out,
        )
        .await?;
        let node_count = driver.nodes_done().await?;

        let edge_fragments = discover_fragments(edges_dir)?;
        let edges = fan_out(
            driver,
            EntityKind::Relationship,
            map_edge_batch,
            edge_fragments,
            &self.options.fan_out,
        )
        .await?;
        let relationship_count = driver.edges_done().await?;
        driver.finish()?;

        Ok(LoadReport {
            generation: driver.generation().clone(),
            nodes: nodes.totals(),
            edges: edges.totals(),
            node_count: Some(node_count),
            relationship_count: Some(relationship_count),
        })
    }
}
