use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use super::dispatch::dispatch;
use super::env::CliArgs;
use super::runtime::{init_logging, load_config};
use crate::metrics;

pub async fn run() -> Result<()> {
    let cli = CliArgs::parse();

    let _log_guard = init_logging(&cli.log_level, cli.debug, cli.log_dir.as_deref())?;
    let _metrics_server = metrics::spawn_metrics_server(cli.metrics_port);

    info!("Starting bluegreen v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&cli.config).await?;

    match dispatch(&cli, config).await {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(err) => {
            error!("Command failed: {:#}", err);
            Err(err)
        }
    }
}
