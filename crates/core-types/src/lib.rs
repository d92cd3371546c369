//! Shared primitives for the blue/green generation orchestrator.
//!
//! Identities (`TenantId`, `GenerationName`, `SnapshotKey`), the load task carried through the
//! worker pool, typed records decoded from the target system, the error taxonomy and the retry
//! policy object live here so every other crate speaks the same vocabulary.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

pub mod error;
pub mod retry;

pub use error::{interpret, BlueGreenError, ErrorKind};
pub use retry::{Backoff, RetryPolicy};

#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix shared by every generation of this tenant.
    pub fn generation_prefix(&self) -> String {
        format!("{}-", self.0)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one discovered snapshot: (tenant, generation timestamp).
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct SnapshotKey {
    pub tenant: TenantId,
    pub timestamp: u64,
}

impl SnapshotKey {
    pub fn new(tenant: TenantId, timestamp: u64) -> Self {
        Self { tenant, timestamp }
    }

    pub fn generation(&self) -> GenerationName {
        GenerationName::new(&self.tenant, self.timestamp)
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.timestamp)
    }
}

/// Database instance name, always `{tenant}-{timestamp}`.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct GenerationName(pub String);

impl GenerationName {
    pub fn new(tenant: &TenantId, timestamp: u64) -> Self {
        Self(format!("{}-{}", tenant.0, timestamp))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Trailing timestamp segment after the last `-`, if it parses.
    pub fn timestamp(&self) -> Option<u64> {
        let (_, tail) = self.0.rsplit_once('-')?;
        tail.parse().ok()
    }

    /// Timestamp of this generation when it belongs to `tenant`.
    ///
    /// The name must be exactly `{tenant}-{digits}`, so `acme-eu-100` is not a generation of
    /// `acme`.
    pub fn timestamp_for(&self, tenant: &TenantId) -> Option<u64> {
        let rest = self.0.strip_prefix(&tenant.generation_prefix())?;
        if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        rest.parse().ok()
    }
}

impl fmt::Display for GenerationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GenerationName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A pending snapshot load. Owned by exactly one worker while it is being processed.
#[derive(Clone, Debug)]
pub struct LoadTask {
    pub key: SnapshotKey,
    pub data_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl LoadTask {
    pub fn new(key: SnapshotKey, data_path: impl Into<PathBuf>) -> Self {
        Self {
            key,
            data_path: data_path.into(),
            created_at: Utc::now(),
            retry_count: 0,
            last_error: None,
        }
    }

    pub fn tenant(&self) -> &TenantId {
        &self.key.tenant
    }

    pub fn timestamp(&self) -> u64 {
        self.key.timestamp
    }

    pub fn generation(&self) -> GenerationName {
        self.key.generation()
    }
}

/// Row of the generation listing.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GenerationRecord {
    pub name: GenerationName,
    pub status: String,
}

impl GenerationRecord {
    pub fn new(name: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            name: GenerationName(name.into()),
            status: status.into(),
        }
    }

    pub fn is_online(&self) -> bool {
        self.status.eq_ignore_ascii_case("online")
    }
}

/// Row of the alias listing.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AliasRecord {
    pub name: String,
    pub target: GenerationName,
}

impl AliasRecord {
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: GenerationName(target.into()),
        }
    }
}

#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeapUsage {
    pub used_bytes: u64,
    pub max_bytes: u64,
}

impl HeapUsage {
    pub fn percent(&self) -> f64 {
        if self.max_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.max_bytes as f64 * 100.0
    }
}

/// Rows and bytes moved for one entity kind, with the wall time it took.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TransferTotals {
    pub rows: u64,
    pub bytes: u64,
    pub elapsed: Duration,
}

impl TransferTotals {
    pub fn rows_per_sec(&self) -> f64 {
        per_second(self.rows, self.elapsed)
    }

    pub fn bytes_per_sec(&self) -> f64 {
        per_second(self.bytes, self.elapsed)
    }
}

fn per_second(amount: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= f64::EPSILON {
        return amount as f64;
    }
    amount as f64 / secs
}

/// Outcome of a successful generation load.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadReport {
    pub generation: GenerationName,
    pub nodes: TransferTotals,
    pub edges: TransferTotals,
    pub node_count: Option<u64>,
    pub relationship_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_name_round_trips_timestamp() {
        let tenant = TenantId::new("acme");
        let name = GenerationName::new(&tenant, 1700000000);
        assert_eq!(name.as_str(), "acme-1700000000");
        assert_eq!(name.timestamp(), Some(1700000000));
        assert_eq!(name.timestamp_for(&tenant), Some(1700000000));
    }

    #[test]
    fn timestamp_for_rejects_other_tenants_and_malformed_names() {
        let tenant = TenantId::new("acme");
        assert_eq!(GenerationName::from("acme-eu-100").timestamp_for(&tenant), None);
        assert_eq!(GenerationName::from("acme-latest").timestamp_for(&tenant), None);
        assert_eq!(GenerationName::from("acme-").timestamp_for(&tenant), None);
        assert_eq!(GenerationName::from("globex-100").timestamp_for(&tenant), None);
        assert_eq!(
            GenerationName::from("acme-eu-100").timestamp_for(&TenantId::new("acme-eu")),
            Some(100)
        );
    }

    #[test]
    fn heap_percent_handles_zero_max() {
        let usage = HeapUsage {
            used_bytes: 90,
            max_bytes: 100,
        };
        assert!((usage.percent() - 90.0).abs() < f64::EPSILON);
        let empty = HeapUsage {
            used_bytes: 10,
            max_bytes: 0,
        };
        assert_eq!(empty.percent(), 0.0);
    }

    #[test]
    fn new_task_starts_with_fresh_retry_budget() {
        let task = LoadTask::new(SnapshotKey::new(TenantId::new("acme"), 200), "/data/acme/200");
        assert_eq!(task.retry_count, 0);
        assert!(task.last_error.is_none());
        assert_eq!(task.generation().as_str(), "acme-200");
    }
}
