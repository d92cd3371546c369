use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bluegreen_core_types::{BlueGreenError, GenerationName, LoadTask, SnapshotKey, TenantId};
use bluegreen_registry::ControlPlane;

use crate::queue::TaskQueue;
use crate::stats::StatsRecorder;

/// Discovers complete snapshots under `{root}/{tenant}/{timestamp}` and enqueues them once.
pub struct SnapshotWatcher {
    root: PathBuf,
    queue: Arc<TaskQueue>,
    stats: Arc<StatsRecorder>,
    seen: Mutex<HashSet<SnapshotKey>>,
    control: Option<Arc<dyn ControlPlane>>,
}

impl SnapshotWatcher {
    pub fn new(root: impl Into<PathBuf>, queue: Arc<TaskQueue>, stats: Arc<StatsRecorder>) -> Self {
        Self {
            root: root.into(),
            queue,
            stats,
            seen: Mutex::new(HashSet::new()),
            control: None,
        }
    }

    /// Also treat snapshots whose generation is already online as seen.
    pub fn with_control_plane(mut self, control: Arc<dyn ControlPlane>) -> Self {
        self.control = Some(control);
        self
    }

    pub fn seen_count(&self) -> usize {
        self.seen.lock().len()
    }

    /// One pass over the snapshot root. Returns the number of tasks enqueued.
    pub async fn scan(&self) -> Result<usize, BlueGreenError> {
        if !tokio::fs::try_exists(&self.root).await.unwrap_or(false) {
            warn!(target: "scheduler", root = %self.root.display(), "snapshot root does not exist");
            return Ok(0);
        }

        let mut online: Option<HashSet<GenerationName>> = None;
        let mut enqueued = 0;
        for tenant_dir in sorted_dirs(&self.root).await? {
            let Some(tenant) = dir_name(&tenant_dir) else {
                continue;
            };
            let tenant = TenantId::new(tenant);
            for snapshot_dir in sorted_dirs(&tenant_dir).await? {
                let Some(timestamp) = dir_name(&snapshot_dir).and_then(|n| n.parse::<u64>().ok())
                else {
                    debug!(target: "scheduler", path = %snapshot_dir.display(), "ignoring non-timestamp directory");
                    continue;
                };
                let key = SnapshotKey::new(tenant.clone(), timestamp);
                if self.seen.lock().contains(&key) {
                    continue;
                }
                if !is_complete(&snapshot_dir).await {
                    debug!(target: "scheduler", snapshot = %key, "snapshot incomplete; waiting");
                    continue;
                }

                if online.is_none() {
                    online = Some(self.online_generations().await);
                }
                if online
                    .as_ref()
                    .is_some_and(|names| names.contains(&key.generation()))
                {
                    info!(target: "scheduler", snapshot = %key, "generation already online; skipping");
                    self.seen.lock().insert(key);
                    continue;
                }

                info!(target: "scheduler", snapshot = %key, path = %snapshot_dir.display(), "discovered snapshot");
                self.queue.push(LoadTask::new(key.clone(), snapshot_dir));
                self.seen.lock().insert(key);
                self.stats.record_discovered();
                enqueued += 1;
            }
        }
        Ok(enqueued)
    }

    async fn online_generations(&self) -> HashSet<GenerationName> {
        let Some(control) = &self.control else {
            return HashSet::new();
        };
        match control.list_generations().await {
            Ok(records) => records
                .into_iter()
                .filter(|record| record.is_online())
                .map(|record| record.name)
                .collect(),
            Err(err) => {
                warn!(target: "scheduler", error = %err, "could not list generations; relying on local seen-set");
                HashSet::new()
            }
        }
    }

    /// Scan immediately, then every `interval` until `shutdown` fires.
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.scan().await {
                        Ok(0) => {}
                        Ok(found) => info!(target: "scheduler", found, "scan enqueued snapshots"),
                        Err(err) => warn!(target: "scheduler", error = %err, "snapshot scan failed"),
                    }
                }
            }
        }
        debug!(target: "scheduler", "snapshot watcher stopped");
    }
}

fn dir_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}

async fn sorted_dirs(parent: &Path) -> Result<Vec<PathBuf>, BlueGreenError> {
    let mut entries = tokio::fs::read_dir(parent).await?;
    let mut dirs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

async fn has_entries(dir: &Path) -> bool {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(Some(_))),
        Err(_) => false,
    }
}

/// Both `nodes/` and `relationships/` exist and are non-empty.
async fn is_complete(snapshot_dir: &Path) -> bool {
    has_entries(&snapshot_dir.join("nodes")).await
        && has_entries(&snapshot_dir.join("relationships")).await
}
