//! Task status state machine and its poller-facing view.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::Job;

/// Highest percent reported while ffmpeg is still running.
pub const MAX_RUNNING_PERCENT: u8 = 99;

/// Lifecycle of one job.
///
/// `Queued -> Processing -> Completed | Failed`. A completed job is logically
/// gone once `expires_at` has passed, whether or not the sweep removed it yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Processing {
        progress: u8,
    },
    Completed {
        artifact_path: PathBuf,
        expires_at: DateTime<Utc>,
    },
    Failed {
        error: String,
    },
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    /// Percent as seen by pollers. `None` for failed jobs.
    pub fn progress(&self) -> Option<u8> {
        match self {
            Self::Queued => Some(0),
            Self::Processing { progress } => Some(*progress),
            Self::Completed { .. } => Some(100),
            Self::Failed { .. } => None,
        }
    }

    /// Whether this is a completed job whose expiry is at or before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self, Self::Completed { expires_at, .. } if *expires_at <= now)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing { .. } => "processing",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Registry entry: the job plus its current status.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub job: Job,
    pub status: TaskStatus,
}

impl TaskRecord {
    pub fn queued(job: Job) -> Self {
        Self {
            job,
            status: TaskStatus::Queued,
        }
    }
}

/// Status returned to pollers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobStatusView {
    Queued {
        position: usize,
    },
    Processing {
        progress: u8,
    },
    Completed {
        progress: u8,
    },
    #[serde(rename = "error")]
    Failed {
        error: String,
    },
}

impl JobStatusView {
    /// Build the view for `status`; `position` is only used while queued.
    pub fn from_status(status: &TaskStatus, position: usize) -> Self {
        match status {
            TaskStatus::Queued => Self::Queued { position },
            TaskStatus::Processing { progress } => Self::Processing {
                progress: (*progress).min(MAX_RUNNING_PERCENT),
            },
            TaskStatus::Completed { .. } => Self::Completed { progress: 100 },
            TaskStatus::Failed { error } => Self::Failed {
                error: error.clone(),
            },
        }
    }
}
