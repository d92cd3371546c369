//! YAML configuration for the `bluegreen` binary.
//!
//! `${VAR}` and `${VAR:default}` references are expanded on the raw text before parsing.
//! Relative paths resolve against the directory holding the configuration file.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Deserialize;
use thiserror::Error;

use bluegreen_core_types::{BlueGreenError, ErrorKind};
use bluegreen_registry::{HealthThresholds, HttpControlPlaneConfig};
use bluegreen_scheduler::OrchestratorConfig;
use bulkload_adapter::{CreateDatabaseOptions, FanOutOptions, FlightConfig, LoaderOptions};

static ENV_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::([^}]*))?\}").expect("valid env reference pattern")
});

#[derive(Debug, Error)]
pub enum ConfigValidationError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("environment variable {0} is not set and has no default")]
    MissingEnv(String),
    #[error("invalid configuration YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("missing configuration section: {0}")]
    MissingSection(&'static str),
    #[error("missing configuration key: {0}")]
    MissingKey(&'static str),
    #[error("{key} must be {rule} (got {value})")]
    OutOfRange {
        key: &'static str,
        rule: &'static str,
        value: String,
    },
    #[error("neo4j.password is empty and NEO4J_PASSWORD is not set")]
    MissingPassword,
}

impl From<ConfigValidationError> for BlueGreenError {
    fn from(value: ConfigValidationError) -> Self {
        BlueGreenError::new(ErrorKind::ConfigValidation).with_hint(value.to_string())
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    neo4j: Option<RawNeo4j>,
    dataset: Option<RawDataset>,
    #[serde(default)]
    worker: WorkerSettings,
    orchestrator: Option<OrchestratorSettings>,
}

#[derive(Debug, Deserialize)]
struct RawNeo4j {
    host: Option<String>,
    arrow_port: Option<u16>,
    #[serde(default = "default_http_port")]
    http_port: u16,
    user: Option<String>,
    #[serde(default)]
    password: String,
    #[serde(default)]
    tls: bool,
    #[serde(default = "default_concurrency")]
    concurrency: u32,
    #[serde(default = "default_database")]
    default_database: String,
}

#[derive(Debug, Deserialize)]
struct RawDataset {
    base_path: Option<PathBuf>,
}

fn default_http_port() -> u16 {
    7474
}

fn default_concurrency() -> u32 {
    4
}

fn default_database() -> String {
    "neo4j".to_string()
}

#[derive(Clone, Debug, PartialEq)]
pub struct Neo4jSettings {
    pub host: String,
    pub arrow_port: u16,
    pub http_port: u16,
    pub user: String,
    pub password: String,
    pub tls: bool,
    pub concurrency: u32,
    pub default_database: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub arrow_table_size: usize,
    /// Fan-out workers; 0 sizes the pool from the CPU count.
    pub concurrency: usize,
    pub transfer_timeout: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            arrow_table_size: 10_000,
            concurrency: 0,
            transfer_timeout: 3600,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub num_workers: usize,
    pub scan_interval: u64,
    pub max_retries: u32,
    pub retry_backoff_base: u32,
    pub health_check_retry_delay: u64,
    pub max_databases: usize,
    pub heap_threshold_percent: f64,
    pub shutdown_timeout: u64,
    pub status_interval: u64,
    pub status_file: Option<PathBuf>,
    pub keep_count: usize,
    pub skip_existing_generations: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            num_workers: 1,
            scan_interval: 30,
            max_retries: 3,
            retry_backoff_base: 2,
            health_check_retry_delay: 60,
            max_databases: 50,
            heap_threshold_percent: 85.0,
            shutdown_timeout: 300,
            status_interval: 5,
            status_file: Some(PathBuf::from("orchestrator_status.json")),
            keep_count: 2,
            skip_existing_generations: true,
        }
    }
}

/// Fully resolved and validated configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    pub neo4j: Neo4jSettings,
    pub data_path: PathBuf,
    pub worker: WorkerSettings,
    pub orchestrator: OrchestratorSettings,
}

impl AppConfig {
    pub async fn load(path: &Path) -> Result<Self, ConfigValidationError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigValidationError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::from_yaml(&text, &base_dir)
    }

    pub fn from_yaml(text: &str, base_dir: &Path) -> Result<Self, ConfigValidationError> {
        let expanded = substitute_env(text)?;
        let raw: RawConfig = serde_yaml::from_str(&expanded)?;

        let neo4j = raw
            .neo4j
            .ok_or(ConfigValidationError::MissingSection("neo4j"))?;
        let dataset = raw
            .dataset
            .ok_or(ConfigValidationError::MissingSection("dataset"))?;
        let mut orchestrator = raw
            .orchestrator
            .ok_or(ConfigValidationError::MissingSection("orchestrator"))?;

        let mut password = neo4j.password;
        if password.is_empty() {
            password = env::var("NEO4J_PASSWORD").unwrap_or_default();
        }
        if password.is_empty() {
            return Err(ConfigValidationError::MissingPassword);
        }

        let neo4j = Neo4jSettings {
            host: neo4j
                .host
                .ok_or(ConfigValidationError::MissingKey("neo4j.host"))?,
            arrow_port: neo4j
                .arrow_port
                .ok_or(ConfigValidationError::MissingKey("neo4j.arrow_port"))?,
            http_port: neo4j.http_port,
            user: neo4j
                .user
                .ok_or(ConfigValidationError::MissingKey("neo4j.user"))?,
            password,
            tls: neo4j.tls,
            concurrency: neo4j.concurrency,
            default_database: neo4j.default_database,
        };
        let data_path = dataset
            .base_path
            .ok_or(ConfigValidationError::MissingKey("dataset.base_path"))?;

        orchestrator.status_file = orchestrator
            .status_file
            .filter(|path| !path.as_os_str().is_empty())
            .map(|path| resolve(base_dir, path));

        let config = Self {
            neo4j,
            data_path: resolve(base_dir, data_path),
            worker: raw.worker,
            orchestrator,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let o = &self.orchestrator;
        at_least("orchestrator.num_workers", o.num_workers as u64, 1)?;
        at_least("orchestrator.scan_interval", o.scan_interval, 1)?;
        at_least("orchestrator.max_databases", o.max_databases as u64, 1)?;
        at_least("orchestrator.keep_count", o.keep_count as u64, 1)?;
        at_least("worker.arrow_table_size", self.worker.arrow_table_size as u64, 1)?;
        if !(1.0..=100.0).contains(&o.heap_threshold_percent) {
            return Err(ConfigValidationError::OutOfRange {
                key: "orchestrator.heap_threshold_percent",
                rule: "between 1 and 100",
                value: o.heap_threshold_percent.to_string(),
            });
        }
        Ok(())
    }

    /// Command-line overrides win over the file.
    pub fn apply_overrides(
        &mut self,
        workers: Option<usize>,
        scan_interval: Option<u64>,
    ) -> Result<(), ConfigValidationError> {
        if let Some(workers) = workers {
            self.orchestrator.num_workers = workers;
        }
        if let Some(interval) = scan_interval {
            self.orchestrator.scan_interval = interval;
        }
        self.validate()
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let o = &self.orchestrator;
        OrchestratorConfig {
            data_path: self.data_path.clone(),
            num_workers: o.num_workers,
            scan_interval: Duration::from_secs(o.scan_interval),
            max_retries: o.max_retries,
            retry_backoff_base: o.retry_backoff_base,
            health_check_retry_delay: Duration::from_secs(o.health_check_retry_delay),
            shutdown_timeout: Duration::from_secs(o.shutdown_timeout),
            status_interval: Duration::from_secs(o.status_interval.max(1)),
            status_file: o.status_file.clone(),
            keep_count: o.keep_count,
            skip_existing_generations: o.skip_existing_generations,
            ..OrchestratorConfig::default()
        }
    }

    pub fn health_thresholds(&self) -> HealthThresholds {
        HealthThresholds {
            max_generations: self.orchestrator.max_databases,
            heap_threshold_percent: self.orchestrator.heap_threshold_percent,
        }
    }

    pub fn flight_config(&self) -> FlightConfig {
        FlightConfig {
            host: self.neo4j.host.clone(),
            port: self.neo4j.arrow_port,
            user: self.neo4j.user.clone(),
            password: self.neo4j.password.clone(),
            ..FlightConfig::default()
        }
    }

    pub fn control_plane_config(&self) -> HttpControlPlaneConfig {
        let scheme = if self.neo4j.tls { "https" } else { "http" };
        HttpControlPlaneConfig {
            base_url: format!("{scheme}://{}:{}", self.neo4j.host, self.neo4j.http_port),
            user: self.neo4j.user.clone(),
            password: self.neo4j.password.clone(),
            default_database: self.neo4j.default_database.clone(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn loader_options(&self) -> LoaderOptions {
        LoaderOptions {
            create: CreateDatabaseOptions {
                concurrency: self.neo4j.concurrency,
                ..CreateDatabaseOptions::default()
            },
            fan_out: FanOutOptions {
                workers: (self.worker.concurrency > 0).then_some(self.worker.concurrency),
                batch_size: self.worker.arrow_table_size,
                timeout: Duration::from_secs(self.worker.transfer_timeout),
            },
            ..LoaderOptions::default()
        }
    }
}

fn at_least(key: &'static str, value: u64, min: u64) -> Result<(), ConfigValidationError> {
    if value < min {
        return Err(ConfigValidationError::OutOfRange {
            key,
            rule: "at least 1",
            value: value.to_string(),
        });
    }
    Ok(())
}

fn resolve(base_dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}

/// Expand `${VAR}` and `${VAR:default}`. A bare `${VAR}` must be set.
pub fn substitute_env(text: &str) -> Result<String, ConfigValidationError> {
    let mut missing = None;
    let expanded = ENV_REFERENCE.replace_all(text, |caps: &Captures<'_>| {
        let name = &caps[1];
        match (env::var(name), caps.get(2)) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.as_str().to_string(),
            (Err(_), None) => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });
    match missing {
        Some(name) => Err(ConfigValidationError::MissingEnv(name)),
        None => Ok(expanded.into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const SAMPLE: &str = r#"
neo4j:
  host: graph.internal
  arrow_port: 8491
  user: neo4j
  password: ${BG_TEST_PASSWORD:hunter2}
dataset:
  base_path: snapshots
worker:
  concurrency: 3
orchestrator:
  num_workers: 2
  scan_interval: 10
  status_file: status/orchestrator.json
"#;

    #[test]
    #[serial]
    fn parses_with_defaults_and_relative_paths() {
        env::remove_var("BG_TEST_PASSWORD");
        let config = AppConfig::from_yaml(SAMPLE, Path::new("/etc/bluegreen")).unwrap();

        assert_eq!(config.neo4j.password, "hunter2");
        assert_eq!(config.neo4j.http_port, 7474);
        assert_eq!(config.data_path, PathBuf::from("/etc/bluegreen/snapshots"));
        assert_eq!(
            config.orchestrator.status_file,
            Some(PathBuf::from("/etc/bluegreen/status/orchestrator.json"))
        );
        assert_eq!(config.orchestrator.keep_count, 2);
        assert_eq!(config.worker.arrow_table_size, 10_000);

        let orchestrator = config.orchestrator_config();
        assert_eq!(orchestrator.num_workers, 2);
        assert_eq!(orchestrator.scan_interval, Duration::from_secs(10));
        assert_eq!(orchestrator.max_retries, 3);

        let loader = config.loader_options();
        assert_eq!(loader.fan_out.workers, Some(3));
        assert_eq!(loader.create.concurrency, 4);
        assert_eq!(
            config.control_plane_config().base_url,
            "http://graph.internal:7474"
        );
        assert_eq!(config.flight_config().uri(), "http://graph.internal:8491");
    }

    #[test]
    #[serial]
    fn required_variable_must_be_set() {
        env::remove_var("BG_TEST_REQUIRED");
        let err = substitute_env("password: ${BG_TEST_REQUIRED}").unwrap_err();
        assert!(matches!(err, ConfigValidationError::MissingEnv(ref name) if name == "BG_TEST_REQUIRED"));

        env::set_var("BG_TEST_REQUIRED", "s3cret");
        assert_eq!(
            substitute_env("password: ${BG_TEST_REQUIRED}").unwrap(),
            "password: s3cret"
        );
        env::remove_var("BG_TEST_REQUIRED");
    }

    #[test]
    #[serial]
    fn empty_password_falls_back_to_environment() {
        let yaml = SAMPLE.replace("${BG_TEST_PASSWORD:hunter2}", "\"\"");
        env::remove_var("NEO4J_PASSWORD");
        assert!(matches!(
            AppConfig::from_yaml(&yaml, Path::new(".")),
            Err(ConfigValidationError::MissingPassword)
        ));

        env::set_var("NEO4J_PASSWORD", "from-env");
        let config = AppConfig::from_yaml(&yaml, Path::new(".")).unwrap();
        assert_eq!(config.neo4j.password, "from-env");
        env::remove_var("NEO4J_PASSWORD");
    }

    #[test]
    #[serial]
    fn rejects_missing_sections_and_bad_ranges() {
        let err = AppConfig::from_yaml("neo4j: {host: a, arrow_port: 1, user: u, password: p}\n", Path::new("."))
            .unwrap_err();
        assert!(matches!(err, ConfigValidationError::MissingSection("dataset")));

        let yaml = SAMPLE.replace("num_workers: 2", "num_workers: 0");
        let err = AppConfig::from_yaml(&yaml, Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("orchestrator.num_workers"));

        let yaml = SAMPLE.replace("scan_interval: 10", "scan_interval: 10\n  heap_threshold_percent: 140");
        assert!(AppConfig::from_yaml(&yaml, Path::new(".")).is_err());
    }

    #[test]
    #[serial]
    fn overrides_are_validated() {
        let mut config = AppConfig::from_yaml(SAMPLE, Path::new(".")).unwrap();
        config.apply_overrides(Some(6), Some(5)).unwrap();
        assert_eq!(config.orchestrator.num_workers, 6);
        assert_eq!(config.orchestrator.scan_interval, 5);
        assert!(config.apply_overrides(None, Some(0)).is_err());
    }
}
