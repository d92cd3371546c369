use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use bluegreen_core_types::LoadTask;

use crate::metrics;

/// Shared queue of pending load tasks.
///
/// FIFO for fresh discoveries; retries and health requeues are appended at the back, so order
/// across re-submitted tasks is not preserved.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: Mutex<VecDeque<LoadTask>>,
    notify: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, task: LoadTask) {
        let depth = {
            let mut tasks = self.tasks.lock();
            tasks.push_back(task);
            tasks.len()
        };
        metrics::set_queue_depth(depth);
        self.notify.notify_one();
    }

    pub fn try_pop(&self) -> Option<LoadTask> {
        let mut tasks = self.tasks.lock();
        let task = tasks.pop_front();
        metrics::set_queue_depth(tasks.len());
        task
    }

    /// Wait up to `wait` for a task.
    pub async fn pop_timeout(&self, wait: Duration) -> Option<LoadTask> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(task) = self.try_pop() {
                return Some(task);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Remove and return everything still queued.
    pub fn drain(&self) -> Vec<LoadTask> {
        let drained: Vec<LoadTask> = self.tasks.lock().drain(..).collect();
        metrics::set_queue_depth(0);
        drained
    }
}
