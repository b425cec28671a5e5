//! FIFO queue of admitted jobs waiting for a worker.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::domain::JobId;

/// Pending jobs in submission order.
#[derive(Debug, Default)]
pub struct JobQueue {
    pending: Mutex<VecDeque<JobId>>,
    notify: Arc<Notify>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job and wake one worker. Returns its 1-based position.
    pub fn enqueue(&self, id: JobId) -> usize {
        let position = {
            let mut pending = self.pending.lock();
            pending.push_back(id);
            pending.len()
        };
        self.notify.notify_one();
        position
    }

    /// Take the oldest pending job.
    pub fn dequeue(&self) -> Option<JobId> {
        self.pending.lock().pop_front()
    }

    /// 1-based position of `id` among pending jobs.
    pub fn position(&self, id: &JobId) -> Option<usize> {
        self.pending
            .lock()
            .iter()
            .position(|queued| queued == id)
            .map(|index| index + 1)
    }

    /// Remove and return every pending job.
    pub fn drain(&self) -> Vec<JobId> {
        self.pending.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Notifier signalled on every enqueue.
    pub fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }
}
