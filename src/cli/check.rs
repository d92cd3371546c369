use std::sync::Arc;

use anyhow::{bail, Context, Result};

use bluegreen_registry::{HealthGate, HealthProbe, HttpControlPlane};

use crate::config::AppConfig;

pub async fn cmd_check(config: AppConfig) -> Result<()> {
    let control = Arc::new(
        HttpControlPlane::new(config.control_plane_config())
            .context("Failed to build control-plane client")?,
    );
    let gate = HealthGate::new(control, config.health_thresholds());
    let verdict = gate.check().await;

    println!("Configuration: ok");
    println!("Data path:     {}", config.data_path.display());
    println!("Target:        {}", config.control_plane_config().base_url);
    if verdict.healthy {
        println!("Health:        healthy");
        Ok(())
    } else {
        println!("Health:        unhealthy ({})", verdict.reason);
        bail!("target is unhealthy: {}", verdict.reason)
    }
}
