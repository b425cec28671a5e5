//! Job submission façade.
//!
//! [`MuxService`] wires the registry, queue, scheduler and retention manager
//! together and is the only entry point the HTTP layer uses.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SharedClock, SystemClock};
use crate::config::MuxConfig;
use crate::domain::{
    ARTIFACT_MIME_TYPE, Job, JobId, JobInputs, JobStatusView, TaskRecord, TaskStatus,
};
use crate::pipeline::{
    ActiveProcesses, ClearSummary, JobQueue, ProcessSupervisor, RetentionManager, Scheduler,
};
use crate::registry::TaskRegistry;
use crate::storage::{FontSource, MuxUpload, StagingArea};
use crate::utils::filename::sanitize_display_name;
use crate::{Error, Result};

/// Accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub job_id: JobId,
    /// 1-based position in the pending queue at submission time.
    pub queue_position: usize,
    /// Cache name of the font used, reusable on later submissions.
    pub font_name: Option<String>,
    pub storage_used: usize,
    pub storage_limit: usize,
}

/// Quota usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageUsage {
    pub used: usize,
    pub limit: usize,
}

/// A downloadable artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    pub job_id: JobId,
    pub path: PathBuf,
    pub mime_type: &'static str,
    /// Name offered to the browser.
    pub download_name: String,
}

/// Entry point for submitting, polling and downloading mux jobs.
pub struct MuxService {
    config: MuxConfig,
    registry: Arc<TaskRegistry>,
    queue: Arc<JobQueue>,
    scheduler: Scheduler,
    retention: Arc<RetentionManager>,
    staging: StagingArea,
    clock: SharedClock,
    cancellation_token: CancellationToken,
}

impl MuxService {
    /// Build a service using the system clock.
    pub fn new(config: MuxConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build a service reading time from `clock`.
    pub fn with_clock(config: MuxConfig, clock: SharedClock) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(TaskRegistry::new());
        let queue = Arc::new(JobQueue::new());
        let active = ActiveProcesses::new();

        let supervisor = Arc::new(ProcessSupervisor::new(
            config.supervisor_config(),
            Arc::clone(&registry),
            Arc::clone(&clock),
        ));
        let scheduler = Scheduler::new(
            config.scheduler_config(),
            Arc::clone(&registry),
            Arc::clone(&queue),
            active.clone(),
            supervisor,
        );
        let retention = Arc::new(RetentionManager::new(
            config.retention_config(),
            Arc::clone(&registry),
            Arc::clone(&queue),
            active,
            Arc::clone(&clock),
            config.storage_roots(),
        ));
        let staging = StagingArea::new(config.storage_roots());

        Ok(Self {
            config,
            registry,
            queue,
            scheduler,
            retention,
            staging,
            clock,
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Reset storage to a clean slate, then start the workers and the sweep.
    pub async fn start(&self) -> Result<()> {
        self.retention.clear_all().await?;
        self.scheduler.start();
        self.retention
            .start_background_task(self.cancellation_token.child_token());
        info!("Mux service started");
        Ok(())
    }

    /// Stop the sweep and the workers, cancelling running jobs.
    pub async fn shutdown(&self) {
        self.cancellation_token.cancel();
        self.scheduler.stop().await;
        info!("Mux service stopped");
    }

    pub fn config(&self) -> &MuxConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn retention(&self) -> &Arc<RetentionManager> {
        &self.retention
    }

    pub fn storage_usage(&self) -> StorageUsage {
        StorageUsage {
            used: self.retention.storage_used(),
            limit: self.retention.storage_limit(),
        }
    }

    /// Submit a job whose inputs are already on stable storage.
    pub async fn submit(&self, inputs: JobInputs, output_name: &str) -> Result<Submission> {
        self.retention.check_admission()?;
        if inputs.video_source.trim().is_empty() {
            return Err(Error::validation("Missing video URL"));
        }

        let gate = self.retention.storage_gate();
        let _staging = gate.read().await;

        let id = JobId::new();
        let work_dir = self.staging.prepare_work_dir(&id).await?;
        self.enqueue(id, inputs, output_name, work_dir, None)
    }

    /// Stage uploaded inputs and submit a job for them.
    ///
    /// Admission is checked before anything is written to disk.
    pub async fn submit_upload(&self, upload: MuxUpload) -> Result<Submission> {
        self.retention.check_admission()?;
        StagingArea::validate(&upload)?;

        let gate = self.retention.storage_gate();
        let _staging = gate.read().await;

        let id = JobId::new();
        let font = self.staging.resolve_font(&upload.font).await?;
        let (work_dir, subtitle_path) = match self.staging.stage_subtitle(&id, &upload.subtitle).await
        {
            Ok(staged) => staged,
            Err(e) => {
                if let Err(cleanup) = self.staging.discard(&self.staging.work_dir(&id)).await {
                    warn!(job_id = %id, error = %cleanup, "Failed to remove partial work dir");
                }
                // Only a font written by this request is removed; cached ones stay shared.
                if matches!(upload.font, FontSource::Upload(_))
                    && let Err(cleanup) = self.staging.discard_font(&font).await
                {
                    warn!(
                        job_id = %id,
                        font = %font.name,
                        error = %cleanup,
                        "Failed to remove uploaded font"
                    );
                }
                return Err(e);
            }
        };

        let inputs = JobInputs::new(upload.video_url.trim(), subtitle_path, font.path);
        let output_name = upload.output_name.as_deref().unwrap_or_default();
        self.enqueue(id, inputs, output_name, work_dir, Some(font.name))
    }

    fn enqueue(
        &self,
        id: JobId,
        inputs: JobInputs,
        output_name: &str,
        work_dir: PathBuf,
        font_name: Option<String>,
    ) -> Result<Submission> {
        let job = Job::new(
            id,
            inputs,
            sanitize_display_name(output_name),
            work_dir,
            self.clock.now(),
        );
        info!(job_id = %id, output_name = %job.output_name, "Mux job submitted");

        self.registry.put(TaskRecord::queued(job));
        let queue_position = self.queue.enqueue(id);

        let usage = self.storage_usage();
        Ok(Submission {
            job_id: id,
            queue_position,
            font_name,
            storage_used: usage.used,
            storage_limit: usage.limit,
        })
    }

    /// Current status of a job. Expired and unknown jobs are `NotFound`.
    pub fn status(&self, id: &JobId) -> Result<JobStatusView> {
        let status = self
            .registry
            .status(id)
            .ok_or_else(|| Error::not_found("Task", id.to_string()))?;

        if status.is_expired_at(self.clock.now()) {
            return Err(Error::not_found("Task", id.to_string()));
        }

        // A job taken off the queue but not yet started reports position 0.
        let position = match status {
            TaskStatus::Queued => self.queue.position(id).unwrap_or(0),
            _ => 0,
        };
        Ok(JobStatusView::from_status(&status, position))
    }

    /// Resolve the artifact of a completed, unexpired job.
    ///
    /// If `requested_name` is given it must match the job's display name,
    /// with or without the `.mkv` suffix.
    pub async fn artifact(&self, id: &JobId, requested_name: Option<&str>) -> Result<ArtifactInfo> {
        let record = self
            .registry
            .get(id)
            .ok_or_else(|| Error::not_found("Task", id.to_string()))?;

        let artifact_path = match &record.status {
            TaskStatus::Completed {
                artifact_path,
                expires_at,
            } => {
                if *expires_at <= self.clock.now() {
                    return Err(Error::Expired(format!("Download link for task {} expired", id)));
                }
                artifact_path.clone()
            }
            TaskStatus::Failed { error } => {
                return Err(Error::NotReady(format!("Task {} failed: {}", id, error)));
            }
            TaskStatus::Queued | TaskStatus::Processing { .. } => {
                return Err(Error::NotReady(format!(
                    "Task {} is still {}",
                    id,
                    record.status.name()
                )));
            }
        };

        let download_name = record.job.download_name();
        if let Some(requested) = requested_name.map(str::trim).filter(|n| !n.is_empty())
            && requested != record.job.output_name
            && requested != download_name
        {
            return Err(Error::validation("Requested filename does not match the task"));
        }

        if !crate::utils::fs::is_file(&artifact_path).await {
            warn!(job_id = %id, "Artifact missing from storage");
            return Err(Error::not_found("Artifact", id.to_string()));
        }

        Ok(ArtifactInfo {
            job_id: *id,
            path: artifact_path,
            mime_type: ARTIFACT_MIME_TYPE,
            download_name,
        })
    }

    /// Forget a completed job and delete its files, typically after download.
    ///
    /// Returns `false` if the job was not completed or already gone.
    pub async fn discard(&self, id: &JobId) -> Result<bool> {
        let removed = self.registry.remove_if(|record| {
            record.job.id == *id && matches!(record.status, TaskStatus::Completed { .. })
        });
        let Some(record) = removed.into_iter().next() else {
            return Ok(false);
        };

        self.staging.discard(&record.job.work_dir).await?;
        debug!(job_id = %id, "Discarded job storage");
        Ok(true)
    }

    /// Whether completed jobs are discarded once downloaded.
    pub fn cleanup_after_download(&self) -> bool {
        self.config.cleanup_after_download
    }

    /// Cancel all jobs, wipe storage and reset the quota.
    pub async fn clear_all(&self) -> Result<ClearSummary> {
        self.retention.clear_all().await
    }

    /// Run one expiry sweep now.
    pub async fn sweep_expired(&self) -> Result<usize> {
        self.retention.sweep_expired().await
    }
}
