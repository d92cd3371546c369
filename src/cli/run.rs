use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use bluegreen_registry::{ControlPlane, HealthGate, HttpControlPlane};
use bluegreen_scheduler::Orchestrator;
use bulkload_adapter::{BulkLoader, GrpcTransportFactory};

use crate::config::AppConfig;
use crate::loader::ArrowSnapshotLoader;

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Override orchestrator.num_workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Override orchestrator.scan_interval (seconds)
    #[arg(short, long, value_name = "SECONDS")]
    pub scan_interval: Option<u64>,
}

/// Wire the orchestrator against the configured target.
pub fn build_orchestrator(config: &AppConfig) -> Result<Orchestrator> {
    let control: Arc<dyn ControlPlane> = Arc::new(
        HttpControlPlane::new(config.control_plane_config())
            .context("Failed to build control-plane client")?,
    );
    let health = Arc::new(HealthGate::new(control.clone(), config.health_thresholds()));
    let factory = Arc::new(GrpcTransportFactory::new(config.flight_config()));
    let loader = Arc::new(ArrowSnapshotLoader::new(BulkLoader::new(
        factory,
        control.clone(),
        config.loader_options(),
    )));
    Ok(Orchestrator::new(
        config.orchestrator_config(),
        control,
        health,
        loader,
    ))
}

pub async fn cmd_run(args: RunArgs, mut config: AppConfig) -> Result<()> {
    config
        .apply_overrides(args.workers, args.scan_interval)
        .context("Invalid command-line override")?;

    let orchestrator = build_orchestrator(&config)?;
    orchestrator
        .start()
        .await
        .context("Failed to start orchestrator")?;
    info!("Orchestrator running; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");

    let report = orchestrator.shutdown().await;
    let stats = orchestrator.stats().snapshot();
    info!(
        discovered = stats.discovered,
        completed = stats.completed,
        failed = stats.failed,
        retried = stats.retried,
        success_rate = stats.success_rate(),
        abandoned = report.abandoned,
        retries_abandoned = report.retries_abandoned,
        "Final statistics"
    );
    Ok(())
}
