use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::queue::TaskQueue;
use crate::stats::StatsRecorder;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    Running,
    Stopping,
    Stopped,
}

/// JSON document written for external monitoring.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusDocument {
    pub uptime_seconds: u64,
    pub tasks_discovered: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_retried: u64,
    pub success_rate: f64,
    pub queue_size: usize,
    pub workers: usize,
    pub scan_interval: u64,
    pub data_path: String,
    pub last_activity: Option<String>,
    pub status: LifecycleStatus,
}

pub struct StatusReporter {
    path: Option<PathBuf>,
    started: Instant,
    stats: Arc<StatsRecorder>,
    queue: Arc<TaskQueue>,
    workers: usize,
    scan_interval: Duration,
    data_path: PathBuf,
    status: Mutex<LifecycleStatus>,
}

impl StatusReporter {
    pub fn new(
        path: Option<PathBuf>,
        stats: Arc<StatsRecorder>,
        queue: Arc<TaskQueue>,
        workers: usize,
        scan_interval: Duration,
        data_path: PathBuf,
    ) -> Self {
        Self {
            path,
            started: Instant::now(),
            stats,
            queue,
            workers,
            scan_interval,
            data_path,
            status: Mutex::new(LifecycleStatus::Running),
        }
    }

    pub fn status(&self) -> LifecycleStatus {
        *self.status.lock()
    }

    pub fn document(&self) -> StatusDocument {
        let stats = self.stats.snapshot();
        StatusDocument {
            uptime_seconds: self.started.elapsed().as_secs(),
            tasks_discovered: stats.discovered,
            tasks_completed: stats.completed,
            tasks_failed: stats.failed,
            tasks_retried: stats.retried,
            success_rate: stats.success_rate(),
            queue_size: self.queue.len(),
            workers: self.workers,
            scan_interval: self.scan_interval.as_secs(),
            data_path: self.data_path.display().to_string(),
            last_activity: stats.last_activity.map(|ts| ts.to_rfc3339()),
            status: self.status(),
        }
    }

    /// Record a lifecycle transition and publish it immediately.
    pub fn set_status(&self, status: LifecycleStatus) {
        *self.status.lock() = status;
        self.publish();
    }

    /// Write the current document. Failures are logged and otherwise ignored.
    pub fn publish(&self) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(err) = write_document(path, &self.document()) {
            debug!(target: "scheduler", path = %path.display(), error = %err, "status write failed");
        }
    }

    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.publish(),
            }
        }
    }
}

fn write_document(path: &Path, document: &StatusDocument) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut writer, document)?;
        writer.flush()?;
    }
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishes_document_with_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orchestrator_status.json");
        let stats = Arc::new(StatsRecorder::new());
        stats.record_discovered();
        stats.record_completed();
        let reporter = StatusReporter::new(
            Some(path.clone()),
            stats,
            Arc::new(TaskQueue::new()),
            3,
            Duration::from_secs(30),
            PathBuf::from("/srv/snapshots"),
        );

        reporter.set_status(LifecycleStatus::Stopping);
        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["status"], "stopping");
        assert_eq!(value["tasks_completed"], 1);
        assert_eq!(value["success_rate"], 100.0);
        assert_eq!(value["workers"], 3);
        assert_eq!(value["scan_interval"], 30);
        assert_eq!(value["data_path"], "/srv/snapshots");
        assert!(value["last_activity"].is_string());
        for key in ["uptime_seconds", "tasks_discovered", "tasks_failed", "tasks_retried", "queue_size"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn unwritable_path_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = StatusReporter::new(
            Some(dir.path().join("missing/dir/status.json")),
            Arc::new(StatsRecorder::new()),
            Arc::new(TaskQueue::new()),
            1,
            Duration::from_secs(30),
            PathBuf::from("data"),
        );
        reporter.publish();
        assert_eq!(reporter.document().last_activity, None);
    }
}
