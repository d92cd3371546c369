use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, trace};

use bluegreen_core_types::{
    AliasRecord, BlueGreenError, ErrorKind, GenerationName, GenerationRecord, HeapUsage,
};

use crate::control::ControlPlane;
use crate::errors::ControlPlaneError;

const SYSTEM_DATABASE: &str = "system";

#[derive(Clone, Debug)]
pub struct HttpControlPlaneConfig {
    /// e.g. `http://localhost:7474`
    pub base_url: String,
    pub user: String,
    pub password: String,
    /// Database used for the liveness probe.
    pub default_database: String,
    pub timeout: Duration,
}

/// Control plane backed by the transactional HTTP endpoint of the target system.
#[derive(Clone, Debug)]
pub struct HttpControlPlane {
    client: Client,
    config: HttpControlPlaneConfig,
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Default, Deserialize)]
struct TxResult {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<TxRow>,
}

#[derive(Debug, Deserialize)]
struct TxRow {
    #[serde(default)]
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    code: String,
    message: String,
}

impl TxResult {
    fn column(&self, name: &str) -> Result<usize, ControlPlaneError> {
        self.columns
            .iter()
            .position(|column| column == name)
            .ok_or_else(|| ControlPlaneError::Decode(format!("missing column `{name}`")))
    }
}

/// Backtick-quote an identifier for use in an admin statement.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

impl HttpControlPlane {
    pub fn new(config: HttpControlPlaneConfig) -> Result<Self, BlueGreenError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| {
                BlueGreenError::new(ErrorKind::ConfigValidation)
                    .with_hint(format!("failed to build http client: {err}"))
            })?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, database: &str) -> String {
        format!(
            "{}/db/{}/tx/commit",
            self.config.base_url.trim_end_matches('/'),
            database
        )
    }

    async fn run(&self, database: &str, statement: &str) -> Result<TxResult, ControlPlaneError> {
        trace!(target: "registry", database, statement, "running admin statement");
        let response: TxResponse = self
            .client
            .post(self.endpoint(database))
            .basic_auth(&self.config.user, Some(&self.config.password))
            .json(&json!({ "statements": [{ "statement": statement }] }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.errors.into_iter().next() {
            return Err(ControlPlaneError::Statement {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.results.into_iter().next().unwrap_or_default())
    }
}

fn string_cell(row: &TxRow, index: usize) -> Option<String> {
    row.row.get(index).and_then(Value::as_str).map(str::to_string)
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn ping(&self) -> Result<(), BlueGreenError> {
        self.run(&self.config.default_database, "RETURN 1 AS health")
            .await?;
        Ok(())
    }

    async fn list_generations(&self) -> Result<Vec<GenerationRecord>, BlueGreenError> {
        let result = self
            .run(
                SYSTEM_DATABASE,
                "SHOW DATABASES YIELD name, currentStatus WHERE name <> 'system' \
                 RETURN name, currentStatus",
            )
            .await?;
        let name_idx = result.column("name")?;
        let status_idx = result.column("currentStatus")?;

        // Clustered deployments report one row per hosting server.
        let mut by_name: BTreeMap<String, String> = BTreeMap::new();
        for row in &result.data {
            let Some(name) = string_cell(row, name_idx) else {
                continue;
            };
            let status = string_cell(row, status_idx).unwrap_or_else(|| "unknown".to_string());
            by_name.entry(name).or_insert(status);
        }
        Ok(by_name
            .into_iter()
            .map(|(name, status)| GenerationRecord::new(name, status))
            .collect())
    }

    async fn list_aliases(&self) -> Result<Vec<AliasRecord>, BlueGreenError> {
        let result = self
            .run(
                SYSTEM_DATABASE,
                "SHOW ALIASES FOR DATABASE YIELD name, database RETURN name, database",
            )
            .await?;
        let name_idx = result.column("name")?;
        let target_idx = result.column("database")?;
        Ok(result
            .data
            .iter()
            .filter_map(|row| {
                Some(AliasRecord::new(
                    string_cell(row, name_idx)?,
                    string_cell(row, target_idx)?,
                ))
            })
            .collect())
    }

    async fn create_alias(
        &self,
        alias: &str,
        target: &GenerationName,
    ) -> Result<(), BlueGreenError> {
        let statement = format!(
            "CREATE ALIAS {} FOR DATABASE {}",
            quote_identifier(alias),
            quote_identifier(target.as_str())
        );
        self.run(SYSTEM_DATABASE, &statement).await?;
        Ok(())
    }

    async fn drop_alias(&self, alias: &str) -> Result<(), BlueGreenError> {
        let statement = format!("DROP ALIAS {} FOR DATABASE", quote_identifier(alias));
        self.run(SYSTEM_DATABASE, &statement).await?;
        Ok(())
    }

    async fn drop_generation(&self, name: &GenerationName) -> Result<(), BlueGreenError> {
        let statement = format!("DROP DATABASE {} IF EXISTS", quote_identifier(name.as_str()));
        self.run(SYSTEM_DATABASE, &statement).await?;
        Ok(())
    }

    async fn heap_usage(&self) -> Result<Option<HeapUsage>, BlueGreenError> {
        let result = match self
            .run(
                SYSTEM_DATABASE,
                "CALL dbms.queryJmx('java.lang:type=Memory') YIELD attributes \
                 RETURN attributes.HeapMemoryUsage.value.properties AS heap",
            )
            .await
        {
            Ok(result) => result,
            Err(err) => {
                debug!(target: "registry", error = %err, "heap telemetry unavailable");
                return Ok(None);
            }
        };
        let heap = result
            .data
            .first()
            .and_then(|row| row.row.first())
            .cloned()
            .unwrap_or(Value::Null);
        let used = heap.get("used").and_then(Value::as_u64);
        let max = heap.get("max").and_then(Value::as_u64);
        Ok(match (used, max) {
            (Some(used_bytes), Some(max_bytes)) if max_bytes > 0 => Some(HeapUsage {
                used_bytes,
                max_bytes,
            }),
            _ => None,
        })
    }
}
