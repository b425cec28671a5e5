//! In-memory task registry.
//!
//! The registry is the only place job state lives. One mutex guards both the
//! task map and the completed-job counter, so terminal transitions and the
//! counter increment are observed together.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::domain::{JobId, MAX_RUNNING_PERCENT, TaskRecord, TaskStatus};
use crate::{Error, Result};

#[derive(Debug, Default)]
struct RegistryState {
    tasks: HashMap<JobId, TaskRecord>,
    completed_jobs: usize,
}

/// Concurrency-safe store of job state keyed by job id.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    state: Mutex<RegistryState>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record.
    pub fn put(&self, record: TaskRecord) {
        self.state.lock().tasks.insert(record.job.id, record);
    }

    pub fn get(&self, id: &JobId) -> Option<TaskRecord> {
        self.state.lock().tasks.get(id).cloned()
    }

    pub fn status(&self, id: &JobId) -> Option<TaskStatus> {
        self.state.lock().tasks.get(id).map(|r| r.status.clone())
    }

    /// Apply `mutator` to the record for `id` while holding the lock.
    pub fn update<R>(&self, id: &JobId, mutator: impl FnOnce(&mut TaskRecord) -> R) -> Result<R> {
        let mut state = self.state.lock();
        let record = state
            .tasks
            .get_mut(id)
            .ok_or_else(|| Error::not_found("Task", id.to_string()))?;
        Ok(mutator(record))
    }

    pub fn remove(&self, id: &JobId) -> Option<TaskRecord> {
        self.state.lock().tasks.remove(id)
    }

    /// Remove and return every record matching `predicate`.
    pub fn remove_if(&self, predicate: impl Fn(&TaskRecord) -> bool) -> Vec<TaskRecord> {
        let mut state = self.state.lock();
        let ids: Vec<JobId> = state
            .tasks
            .iter()
            .filter(|(_, record)| predicate(record))
            .map(|(id, _)| *id)
            .collect();
        ids.iter()
            .filter_map(|id| state.tasks.remove(id))
            .collect()
    }

    /// Snapshot of every record.
    pub fn all(&self) -> Vec<TaskRecord> {
        self.state.lock().tasks.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().tasks.is_empty()
    }

    /// Number of jobs that reached a terminal state since the last clear.
    pub fn completed_jobs(&self) -> usize {
        self.state.lock().completed_jobs
    }

    /// Number of jobs currently in `Processing`.
    pub fn processing_count(&self) -> usize {
        self.state
            .lock()
            .tasks
            .values()
            .filter(|r| matches!(r.status, TaskStatus::Processing { .. }))
            .count()
    }

    /// Move a queued job to `Processing { progress: 0 }`.
    ///
    /// Returns `false` if the job is gone or no longer queued.
    pub fn begin_processing(&self, id: &JobId) -> bool {
        let mut state = self.state.lock();
        match state.tasks.get_mut(id) {
            Some(record) if record.status == TaskStatus::Queued => {
                record.status = TaskStatus::Processing { progress: 0 };
                true
            }
            _ => false,
        }
    }

    /// Raise the progress of a processing job.
    ///
    /// Values are capped at 99 and never move backwards. Returns the stored
    /// value when it changed.
    pub fn raise_progress(&self, id: &JobId, percent: u8) -> Option<u8> {
        let percent = percent.min(MAX_RUNNING_PERCENT);
        let mut state = self.state.lock();
        match state.tasks.get_mut(id).map(|r| &mut r.status) {
            Some(TaskStatus::Processing { progress }) if percent > *progress => {
                *progress = percent;
                Some(percent)
            }
            _ => None,
        }
    }

    /// Record a terminal status and count the job against the quota.
    ///
    /// Only a queued or processing job can finish, so the counter moves at
    /// most once per job. Returns `false` if the job was removed or already
    /// terminal.
    pub fn finish(&self, id: &JobId, status: TaskStatus) -> bool {
        debug_assert!(status.is_terminal());
        let mut state = self.state.lock();
        let Some(record) = state.tasks.get_mut(id) else {
            return false;
        };
        if record.status.is_terminal() {
            return false;
        }
        record.status = status;
        state.completed_jobs += 1;
        true
    }

    /// Remove every record and reset the completed-job counter.
    ///
    /// Returns the removed records.
    pub fn clear(&self) -> Vec<TaskRecord> {
        let mut state = self.state.lock();
        state.completed_jobs = 0;
        state.tasks.drain().map(|(_, record)| record).collect()
    }
}
