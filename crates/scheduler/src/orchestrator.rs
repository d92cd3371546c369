use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use bluegreen_registry::{ControlPlane, HealthProbe};

use crate::error::SchedulerError;
use crate::executor::SnapshotLoader;
use crate::model::OrchestratorConfig;
use crate::queue::TaskQueue;
use crate::retry::RetryScheduler;
use crate::stats::StatsRecorder;
use crate::status::{LifecycleStatus, StatusReporter};
use crate::watcher::SnapshotWatcher;
use crate::worker::{run_worker, WorkerContext};

const DRAIN_POLL: Duration = Duration::from_millis(100);

/// What graceful shutdown left behind.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Tasks that reached a terminal outcome while draining.
    pub drained: u64,
    /// Tasks still queued when the workers stopped.
    pub abandoned: usize,
    /// Retries still waiting on their backoff timer.
    pub retries_abandoned: usize,
    /// Workers that had to be aborted mid-task.
    pub workers_aborted: usize,
    /// Retry timer, watcher or status loop that panicked or was cancelled.
    pub background_failures: usize,
}

struct Running {
    ctx: Arc<WorkerContext>,
    workers: Vec<JoinHandle<()>>,
    background: Vec<JoinHandle<()>>,
}

/// Wires discovery, the worker pool, retries and status reporting together.
pub struct Orchestrator {
    config: OrchestratorConfig,
    control: Arc<dyn ControlPlane>,
    health: Arc<dyn HealthProbe>,
    loader: Arc<dyn SnapshotLoader>,
    queue: Arc<TaskQueue>,
    stats: Arc<StatsRecorder>,
    status: Arc<StatusReporter>,
    /// Stops discovery, the retry timer and status publishing.
    shutdown: CancellationToken,
    /// Stops the workers once the drain window is over.
    stop: CancellationToken,
    running: Mutex<Option<Running>>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        control: Arc<dyn ControlPlane>,
        health: Arc<dyn HealthProbe>,
        loader: Arc<dyn SnapshotLoader>,
    ) -> Self {
        let queue = Arc::new(TaskQueue::new());
        let stats = Arc::new(StatsRecorder::new());
        let status = Arc::new(StatusReporter::new(
            config.status_file.clone(),
            stats.clone(),
            queue.clone(),
            config.num_workers,
            config.scan_interval,
            config.data_path.clone(),
        ));
        Self {
            config,
            control,
            health,
            loader,
            queue,
            stats,
            status,
            shutdown: CancellationToken::new(),
            stop: CancellationToken::new(),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn queue(&self) -> Arc<TaskQueue> {
        self.queue.clone()
    }

    pub fn stats(&self) -> Arc<StatsRecorder> {
        self.stats.clone()
    }

    pub fn status(&self) -> Arc<StatusReporter> {
        self.status.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Validate, probe the target, then spawn every loop.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        self.config.validate()?;

        let is_dir = tokio::fs::metadata(&self.config.data_path)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(SchedulerError::DataPathNotFound(self.config.data_path.clone()));
        }

        self.control
            .ping()
            .await
            .map_err(SchedulerError::TargetUnreachable)?;

        let mut running = self.running.lock().await;
        if running.is_some() || self.shutdown.is_cancelled() {
            return Err(SchedulerError::AlreadyStarted);
        }

        let (retries, timer) = RetryScheduler::spawn(self.queue.clone(), self.shutdown.clone());
        let ctx = Arc::new(WorkerContext::new(
            &self.config,
            self.queue.clone(),
            self.health.clone(),
            self.loader.clone(),
            self.control.clone(),
            self.stats.clone(),
            retries,
        ));

        let workers = (0..self.config.num_workers)
            .map(|id| tokio::spawn(run_worker(id, ctx.clone(), self.stop.clone())))
            .collect();

        let mut watcher =
            SnapshotWatcher::new(&self.config.data_path, self.queue.clone(), self.stats.clone());
        if self.config.skip_existing_generations {
            watcher = watcher.with_control_plane(self.control.clone());
        }
        let watcher = Arc::new(watcher);

        let background = vec![
            timer,
            tokio::spawn(watcher.run(self.config.scan_interval, self.shutdown.clone())),
            tokio::spawn(
                self.status
                    .clone()
                    .run(self.config.status_interval, self.shutdown.clone()),
            ),
        ];

        *running = Some(Running {
            ctx,
            workers,
            background,
        });
        self.status.set_status(LifecycleStatus::Running);
        info!(
            target: "scheduler",
            workers = self.config.num_workers,
            scan_interval_secs = self.config.scan_interval.as_secs(),
            data_path = %self.config.data_path.display(),
            "orchestrator started"
        );
        Ok(())
    }

    /// Stop discovery, let workers drain the queue within the shutdown timeout, then stop them.
    pub async fn shutdown(&self) -> ShutdownReport {
        let Some(running) = self.running.lock().await.take() else {
            return ShutdownReport::default();
        };
        info!(
            target: "scheduler",
            timeout_secs = self.config.shutdown_timeout.as_secs(),
            "orchestrator stopping"
        );
        self.status.set_status(LifecycleStatus::Stopping);
        self.shutdown.cancel();

        let before = self.stats.snapshot();
        let deadline = Instant::now() + self.config.shutdown_timeout;
        while !(self.queue.is_empty() && running.ctx.in_flight() == 0) && Instant::now() < deadline
        {
            sleep(DRAIN_POLL).await;
        }
        self.stop.cancel();

        let mut report = ShutdownReport::default();
        for mut handle in running.workers {
            if timeout_at(deadline, &mut handle).await.is_err() {
                handle.abort();
                report.workers_aborted += 1;
            }
        }
        for handle in running.background {
            if let Err(err) = handle.await {
                warn!(target: "scheduler", error = %err, "background task failed");
                report.background_failures += 1;
            }
        }

        let after = self.stats.snapshot();
        report.drained = (after.completed + after.failed) - (before.completed + before.failed);
        report.retries_abandoned = running.ctx.retries().pending() + running.ctx.retries_rejected();
        report.abandoned = self.queue.drain().len();
        if report.abandoned > 0
            || report.retries_abandoned > 0
            || report.workers_aborted > 0
            || report.background_failures > 0
        {
            warn!(
                target: "scheduler",
                abandoned = report.abandoned,
                retries_abandoned = report.retries_abandoned,
                workers_aborted = report.workers_aborted,
                background_failures = report.background_failures,
                "shutdown left work unfinished"
            );
        }

        self.status.set_status(LifecycleStatus::Stopped);
        info!(target: "scheduler", drained = report.drained, "orchestrator stopped");
        report
    }
}
