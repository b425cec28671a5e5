//! Artifact retention: admission quota, expiry sweep and bulk clear.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::job_queue::JobQueue;
use super::supervisor::ActiveProcesses;
use crate::clock::{Clock, SharedClock};
use crate::domain::TaskStatus;
use crate::registry::TaskRegistry;
use crate::utils::fs;
use crate::{Error, Result};

/// Configuration for artifact retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Terminal jobs allowed before new submissions are refused.
    #[serde(default = "default_storage_limit")]
    pub storage_limit: usize,

    /// Seconds a completed artifact stays downloadable.
    #[serde(default = "default_artifact_ttl_secs")]
    pub artifact_ttl_secs: u64,

    /// Seconds between expiry sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_storage_limit() -> usize {
    12
}

fn default_artifact_ttl_secs() -> u64 {
    3600 // 1 hour
}

fn default_sweep_interval_secs() -> u64 {
    1800 // 30 minutes
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            storage_limit: default_storage_limit(),
            artifact_ttl_secs: default_artifact_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl RetentionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_storage_limit(mut self, limit: usize) -> Self {
        self.storage_limit = limit;
        self
    }

    pub fn with_artifact_ttl_secs(mut self, secs: u64) -> Self {
        self.artifact_ttl_secs = secs;
        self
    }

    pub fn with_sweep_interval_secs(mut self, secs: u64) -> Self {
        self.sweep_interval_secs = secs;
        self
    }
}

/// Storage roots wiped by a bulk clear.
#[derive(Debug, Clone)]
pub struct StorageRoots {
    pub uploads_dir: PathBuf,
    pub fonts_dir: PathBuf,
}

/// Result of a bulk clear.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClearSummary {
    /// Registry entries removed.
    pub removed_jobs: usize,
    /// Pending jobs dropped from the queue.
    pub dequeued_jobs: usize,
    /// Running ffmpeg processes that were cancelled.
    pub cancelled_processes: usize,
}

/// Enforces the completed-job quota and the lifetime of artifacts.
pub struct RetentionManager {
    config: RetentionConfig,
    registry: Arc<TaskRegistry>,
    queue: Arc<JobQueue>,
    active: ActiveProcesses,
    clock: SharedClock,
    roots: StorageRoots,
    /// Staging holds the read side; a bulk clear holds the write side.
    storage_gate: Arc<RwLock<()>>,
}

impl RetentionManager {
    pub fn new(
        config: RetentionConfig,
        registry: Arc<TaskRegistry>,
        queue: Arc<JobQueue>,
        active: ActiveProcesses,
        clock: SharedClock,
        roots: StorageRoots,
    ) -> Self {
        Self {
            config,
            registry,
            queue,
            active,
            clock,
            roots,
            storage_gate: Arc::new(RwLock::new(())),
        }
    }

    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    pub fn roots(&self) -> &StorageRoots {
        &self.roots
    }

    /// Gate that serializes staging against bulk clears.
    pub fn storage_gate(&self) -> Arc<RwLock<()>> {
        Arc::clone(&self.storage_gate)
    }

    /// Jobs counted against the quota.
    pub fn storage_used(&self) -> usize {
        self.registry.completed_jobs()
    }

    pub fn storage_limit(&self) -> usize {
        self.config.storage_limit
    }

    /// Whether a new submission may be accepted right now.
    pub fn admit(&self) -> bool {
        self.storage_used() < self.config.storage_limit
    }

    /// Like [`admit`](Self::admit) but as an error for the submitter.
    pub fn check_admission(&self) -> Result<()> {
        let used = self.storage_used();
        let limit = self.config.storage_limit;
        if used >= limit {
            return Err(Error::StorageFull { used, limit });
        }
        Ok(())
    }

    /// Cancel everything, forget every job and recreate the storage roots.
    ///
    /// Afterwards the system looks exactly like a fresh start.
    pub async fn clear_all(&self) -> Result<ClearSummary> {
        let _gate = self.storage_gate.write().await;

        let dequeued_jobs = self.queue.drain().len();
        let removed_jobs = self.registry.clear().len();
        let cancelled_processes = self.active.cancel_all_and_wait().await;

        fs::recreate_dir(&self.roots.uploads_dir).await?;
        fs::recreate_dir(&self.roots.fonts_dir).await?;

        let summary = ClearSummary {
            removed_jobs,
            dequeued_jobs,
            cancelled_processes,
        };
        info!(
            removed = summary.removed_jobs,
            dequeued = summary.dequeued_jobs,
            cancelled = summary.cancelled_processes,
            "Cleared all mux data"
        );
        Ok(summary)
    }

    /// Remove every completed job past its expiry and delete its files.
    ///
    /// Returns the number of jobs removed.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let expired = self.registry.remove_if(|record| record.status.is_expired_at(now));
        if expired.is_empty() {
            debug!("No expired artifacts");
            return Ok(0);
        }

        let mut first_error = None;
        for record in &expired {
            if let TaskStatus::Completed { expires_at, .. } = &record.status {
                debug!(job_id = %record.job.id, %expires_at, "Artifact expired");
            }
            if let Err(e) = fs::remove_dir_all_if_exists(&record.job.work_dir).await {
                warn!(job_id = %record.job.id, "Failed to delete expired artifact: {}", e);
                first_error.get_or_insert(e);
            }
        }

        info!("Expired {} artifact(s)", expired.len());
        match first_error {
            Some(e) => Err(e),
            None => Ok(expired.len()),
        }
    }

    /// Start the periodic expiry sweep.
    pub fn start_background_task(
        self: &Arc<Self>,
        cancellation_token: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let period = Duration::from_secs(self.config.sweep_interval_secs.max(1));

        tokio::spawn(async move {
            let mut sweep_interval = interval(period);
            sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            sweep_interval.tick().await;

            info!(
                "Artifact sweep started (ttl: {}s, interval: {}s)",
                manager.config.artifact_ttl_secs,
                period.as_secs()
            );

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        info!("Artifact sweep shutting down");
                        break;
                    }
                    _ = sweep_interval.tick() => {
                        match manager.sweep_expired().await {
                            Ok(removed) => {
                                if removed > 0 {
                                    debug!("Sweep cycle completed: {} artifact(s) removed", removed);
                                }
                            }
                            Err(e) => {
                                error!("Sweep cycle failed: {}", e);
                            }
                        }
                    }
                }
            }
        })
    }
}
