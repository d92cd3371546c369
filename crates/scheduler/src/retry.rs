use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;
use tracing::{debug, warn};

use bluegreen_core_types::LoadTask;

use crate::metrics;
use crate::queue::TaskQueue;

/// Re-submits tasks to the queue once their backoff elapses.
///
/// A single timer task owns every pending delay.
#[derive(Clone, Debug)]
pub struct RetryScheduler {
    tx: mpsc::UnboundedSender<(LoadTask, Duration)>,
    pending: Arc<AtomicUsize>,
}

impl RetryScheduler {
    pub fn spawn(queue: Arc<TaskQueue>, shutdown: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let handle = tokio::spawn(run_timer(queue, rx, pending.clone(), shutdown));
        (Self { tx, pending }, handle)
    }

    /// `false` when the timer has already stopped and the task is dropped.
    pub fn schedule(&self, task: LoadTask, delay: Duration) -> bool {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send((task, delay)).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        metrics::set_retries_pending(self.pending());
        true
    }

    /// Tasks still waiting for their delay.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

async fn run_timer(
    queue: Arc<TaskQueue>,
    mut rx: mpsc::UnboundedReceiver<(LoadTask, Duration)>,
    pending: Arc<AtomicUsize>,
    shutdown: CancellationToken,
) {
    let mut delays: DelayQueue<LoadTask> = DelayQueue::new();
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            received = rx.recv() => match received {
                Some((task, delay)) => {
                    debug!(
                        target: "scheduler",
                        snapshot = %task.key,
                        delay_secs = delay.as_secs(),
                        "retry scheduled"
                    );
                    delays.insert(task, delay);
                }
                None => break,
            },
            Some(expired) = delays.next(), if !delays.is_empty() => {
                let task = expired.into_inner();
                pending.fetch_sub(1, Ordering::SeqCst);
                metrics::set_retries_pending(pending.load(Ordering::SeqCst));
                debug!(target: "scheduler", snapshot = %task.key, retry = task.retry_count, "retry due; requeued");
                queue.push(task);
            }
        }
    }

    // Stop accepting new retries before counting what is abandoned.
    rx.close();
    while rx.try_recv().is_ok() {}
    let abandoned = pending.load(Ordering::SeqCst);
    if abandoned > 0 {
        warn!(target: "scheduler", abandoned, "retry timer stopped with retries still pending");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bluegreen_core_types::{SnapshotKey, TenantId};

    fn task(ts: u64) -> LoadTask {
        LoadTask::new(SnapshotKey::new(TenantId::new("acme"), ts), "/data")
    }

    #[tokio::test(start_paused = true)]
    async fn requeues_after_delay() {
        let queue = Arc::new(TaskQueue::new());
        let shutdown = CancellationToken::new();
        let (retries, handle) = RetryScheduler::spawn(queue.clone(), shutdown.clone());

        assert!(retries.schedule(task(1), Duration::from_secs(4)));
        assert!(retries.schedule(task(2), Duration::from_secs(2)));
        assert_eq!(retries.pending(), 2);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.try_pop().unwrap().timestamp(), 2);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(queue.try_pop().unwrap().timestamp(), 1);
        assert_eq!(retries.pending(), 0);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_abandons_pending_retries() {
        let queue = Arc::new(TaskQueue::new());
        let shutdown = CancellationToken::new();
        let (retries, handle) = RetryScheduler::spawn(queue.clone(), shutdown.clone());
        retries.schedule(task(1), Duration::from_secs(60));
        tokio::task::yield_now().await;

        shutdown.cancel();
        handle.await.unwrap();
        assert!(!retries.schedule(task(2), Duration::from_secs(1)));
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(queue.is_empty());
    }
}
