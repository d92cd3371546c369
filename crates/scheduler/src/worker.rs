use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use bluegreen_core_types::{BlueGreenError, LoadTask, RetryPolicy, TenantId};
use bluegreen_registry::{AliasCutover, ControlPlane, HealthProbe, RetentionGc};

use crate::executor::SnapshotLoader;
use crate::model::{OrchestratorConfig, TaskOutcome};
use crate::queue::TaskQueue;
use crate::retry::RetryScheduler;
use crate::stats::StatsRecorder;

/// Everything a worker needs to take one task from dequeue to a terminal outcome.
pub struct WorkerContext {
    queue: Arc<TaskQueue>,
    health: Arc<dyn HealthProbe>,
    loader: Arc<dyn SnapshotLoader>,
    cutover: AliasCutover,
    retention: RetentionGc,
    stats: Arc<StatsRecorder>,
    retries: RetryScheduler,
    retry_policy: RetryPolicy,
    health_cooldown: Duration,
    keep_count: usize,
    dequeue_timeout: Duration,
    /// Serializes latest-check, cutover and retention per tenant.
    tenant_locks: DashMap<TenantId, Arc<AsyncMutex<()>>>,
    in_flight: AtomicUsize,
    retries_rejected: AtomicUsize,
}

impl WorkerContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &OrchestratorConfig,
        queue: Arc<TaskQueue>,
        health: Arc<dyn HealthProbe>,
        loader: Arc<dyn SnapshotLoader>,
        control: Arc<dyn ControlPlane>,
        stats: Arc<StatsRecorder>,
        retries: RetryScheduler,
    ) -> Self {
        Self {
            queue,
            health,
            loader,
            cutover: AliasCutover::new(control.clone()),
            retention: RetentionGc::new(control),
            stats,
            retries,
            retry_policy: config.retry_policy(),
            health_cooldown: config.health_check_retry_delay,
            keep_count: config.keep_count,
            dequeue_timeout: config.dequeue_timeout,
            tenant_locks: DashMap::new(),
            in_flight: AtomicUsize::new(0),
            retries_rejected: AtomicUsize::new(0),
        }
    }

    /// Tasks currently held by a worker.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Retries that could not be scheduled because the timer had stopped.
    pub fn retries_rejected(&self) -> usize {
        self.retries_rejected.load(Ordering::SeqCst)
    }

    pub fn retries(&self) -> &RetryScheduler {
        &self.retries
    }

    /// Run one task through admission, load, cutover and retention.
    pub async fn process(&self, task: LoadTask) -> TaskOutcome {
        let verdict = self.health.check().await;
        if !verdict.healthy {
            warn!(
                target: "scheduler",
                snapshot = %task.key,
                reason = %verdict.reason,
                "target unhealthy; task deferred"
            );
            self.queue.push(task);
            self.stats.record_deferred();
            return TaskOutcome::Deferred;
        }

        info!(
            target: "scheduler",
            snapshot = %task.key,
            retry = task.retry_count,
            "loading snapshot"
        );
        match self.loader.load(&task).await {
            Ok(report) => {
                info!(
                    target: "scheduler",
                    generation = %report.generation,
                    node_rows = report.nodes.rows,
                    edge_rows = report.edges.rows,
                    "generation loaded"
                );
                let cutover = self.promote(&task).await;
                self.stats.record_completed();
                TaskOutcome::Completed { cutover }
            }
            Err(err) => self.handle_failure(task, err),
        }
    }

    fn tenant_lock(&self, tenant: &TenantId) -> Arc<AsyncMutex<()>> {
        self.tenant_locks.entry(tenant.clone()).or_default().clone()
    }

    /// Latest-check, alias cutover and retention for a freshly loaded generation.
    ///
    /// Returns whether the alias now points at it. Nothing here fails the task.
    async fn promote(&self, task: &LoadTask) -> bool {
        let tenant = task.tenant();
        let generation = task.generation();
        let lock = self.tenant_lock(tenant);
        let _guard = lock.lock().await;

        let cutover = match self.cutover.is_latest(tenant, task.timestamp()).await {
            Ok(true) => self.cutover.set_alias(tenant, &generation).await,
            Ok(false) => {
                info!(
                    target: "scheduler",
                    generation = %generation,
                    "newer generation exists; alias left in place"
                );
                false
            }
            Err(err) => {
                error!(target: "scheduler", generation = %generation, error = %err, "latest check failed");
                false
            }
        };

        match self.retention.cleanup(tenant, self.keep_count).await {
            Ok(report) => debug!(
                target: "scheduler",
                tenant = %tenant,
                retained = report.retained.len(),
                protected = report.protected.len(),
                deleted = report.deleted.len(),
                failed = report.failed.len(),
                "retention pass finished"
            ),
            Err(err) => error!(target: "scheduler", tenant = %tenant, error = %err, "retention pass failed"),
        }
        cutover
    }

    fn handle_failure(&self, mut task: LoadTask, err: BlueGreenError) -> TaskOutcome {
        let next = task.retry_count + 1;
        task.last_error = Some(err.to_string());

        if !self.retry_policy.allows_retry(next) {
            error!(
                target: "scheduler",
                snapshot = %task.key,
                attempts = next,
                error = %err,
                "load failed permanently"
            );
            self.stats.record_failed();
            return TaskOutcome::Failed;
        }

        task.retry_count = next;
        let delay = self.retry_policy.delay_for(next);
        warn!(
            target: "scheduler",
            snapshot = %task.key,
            retry = next,
            max_retries = self.retry_policy.max_retries(),
            delay_secs = delay.as_secs(),
            error = %err,
            "load failed; retry scheduled"
        );
        self.stats.record_retried();
        if !self.retries.schedule(task, delay) {
            warn!(target: "scheduler", retry = next, "retry timer stopped; retry abandoned");
            self.retries_rejected.fetch_add(1, Ordering::SeqCst);
        }
        TaskOutcome::Retrying { retry: next, delay }
    }
}

/// Pull tasks until `stop` fires. A task already taken is finished before the worker exits.
pub async fn run_worker(id: usize, ctx: Arc<WorkerContext>, stop: CancellationToken) {
    debug!(target: "scheduler", worker = id, "worker started");
    loop {
        let task = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            task = ctx.queue.pop_timeout(ctx.dequeue_timeout) => task,
        };
        let Some(task) = task else {
            continue;
        };

        ctx.in_flight.fetch_add(1, Ordering::SeqCst);
        let outcome = ctx.process(task).await;
        ctx.in_flight.fetch_sub(1, Ordering::SeqCst);

        if outcome == TaskOutcome::Deferred {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(ctx.health_cooldown) => {}
            }
        }
    }
    debug!(target: "scheduler", worker = id, "worker stopped");
}
