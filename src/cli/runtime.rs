use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::AppConfig;

/// Install the global subscriber. `RUST_LOG` wins over `level`; `debug` forces DEBUG.
///
/// The returned guard flushes the file writer and must outlive the process' work.
pub fn init_logging(level: &str, debug: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let file_name = format!("bluegreen_{}.log", Local::now().format("%Y%m%d_%H%M%S"));
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string())))
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

pub async fn load_config(path: &Path) -> Result<AppConfig> {
    let config = AppConfig::load(path)
        .await
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    info!(
        path = %path.display(),
        data_path = %config.data_path.display(),
        host = %config.neo4j.host,
        "Loaded configuration"
    );
    Ok(config)
}
