//! Supervision of one ffmpeg invocation.
//!
//! The supervisor spawns ffmpeg for a job, reads both output pipes until they
//! close, feeds every line to the progress parser, and records exactly one
//! terminal status in the registry. Cancellation and the job timeout stop the
//! process with SIGTERM first and SIGKILL after the grace period.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use process_utils::{Termination, terminate_gracefully};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ffmpeg::mux_command;
use super::progress::{ProgressTracker, parse_line};
use crate::clock::{Clock, SharedClock};
use crate::domain::{Job, JobId, TaskStatus};
use crate::registry::TaskRegistry;
use crate::utils::fs;

/// Longest ffmpeg error line kept in a failure message.
const MAX_ERROR_LINE_LEN: usize = 500;

/// Failure message for a cancelled job.
pub const CANCELLED_MESSAGE: &str = "cancelled";

/// Live handle for one supervised process.
#[derive(Debug, Clone)]
struct ActiveProcessHandle {
    cancel: CancellationToken,
    released: CancellationToken,
}

/// Registry of running processes, keyed by job id.
///
/// Holding an entry means a supervisor may still own a live ffmpeg process for
/// that job. Entries disappear when their [`ActiveProcessGuard`] is dropped.
#[derive(Debug, Clone, Default)]
pub struct ActiveProcesses {
    inner: Arc<DashMap<JobId, ActiveProcessHandle>>,
}

impl ActiveProcesses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle for `id`.
    ///
    /// The returned token cancels the supervised process and also fires when
    /// `parent` is cancelled. The guard releases the handle when dropped.
    pub fn register(
        &self,
        id: JobId,
        parent: &CancellationToken,
    ) -> (CancellationToken, ActiveProcessGuard) {
        let handle = ActiveProcessHandle {
            cancel: parent.child_token(),
            released: CancellationToken::new(),
        };
        let cancel = handle.cancel.clone();
        let released = handle.released.clone();
        self.inner.insert(id, handle);
        (
            cancel,
            ActiveProcessGuard {
                id,
                processes: Arc::clone(&self.inner),
                released,
            },
        )
    }

    /// Cancel one process. Returns `false` if no handle exists for `id`.
    pub fn cancel(&self, id: &JobId) -> bool {
        match self.inner.get(id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every process and wait until each handle has been released.
    ///
    /// Returns the number of handles that were cancelled.
    pub async fn cancel_all_and_wait(&self) -> usize {
        let released: Vec<CancellationToken> = self
            .inner
            .iter()
            .map(|entry| {
                entry.cancel.cancel();
                entry.released.clone()
            })
            .collect();
        let count = released.len();
        for token in released {
            token.cancelled().await;
        }
        count
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Releases an active process handle on drop.
#[derive(Debug)]
pub struct ActiveProcessGuard {
    id: JobId,
    processes: Arc<DashMap<JobId, ActiveProcessHandle>>,
    released: CancellationToken,
}

impl Drop for ActiveProcessGuard {
    fn drop(&mut self) {
        self.processes.remove(&self.id);
        self.released.cancel();
    }
}

/// Supervisor settings.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub ffmpeg_path: String,
    /// Time between SIGTERM and SIGKILL.
    pub kill_grace: Duration,
    /// Upper bound on one ffmpeg run.
    pub job_timeout: Duration,
    /// How long a completed artifact stays downloadable.
    pub artifact_ttl: chrono::Duration,
}

/// How a supervised run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed(String),
}

enum StopReason {
    Cancelled,
    TimedOut,
}

/// Runs ffmpeg for jobs and records their terminal status.
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    registry: Arc<TaskRegistry>,
    clock: SharedClock,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig, registry: Arc<TaskRegistry>, clock: SharedClock) -> Self {
        Self {
            config,
            registry,
            clock,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Run ffmpeg for `job` until it exits or `cancel` fires.
    ///
    /// The job must already be `Processing`. The terminal status is written to
    /// the registry unless the entry was removed in the meantime.
    pub async fn run(&self, job: &Job, cancel: CancellationToken) -> JobOutcome {
        let job_id = job.id;
        let mut command = mux_command(&self.config.ffmpeg_path, job);
        debug!(job_id = %job_id, "Spawning ffmpeg: {:?}", command.as_std());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return self
                    .fail(job, format!("failed to spawn ffmpeg: {}", e))
                    .await;
            }
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            terminate(&mut child, self.config.kill_grace).await;
            return self
                .fail(job, "failed to capture ffmpeg output".to_string())
                .await;
        };

        let mut stdout_lines = OutputLines::new(stdout);
        let mut stderr_lines = OutputLines::new(stderr);
        let mut stdout_done = false;
        let mut stderr_done = false;
        let mut tracker = ProgressTracker::new();
        let mut last_error: Option<String> = None;

        let deadline = tokio::time::sleep(self.config.job_timeout);
        tokio::pin!(deadline);

        // Drain both pipes fully; ffmpeg blocks once a pipe buffer fills.
        let mut stop = None;
        while !(stdout_done && stderr_done) {
            tokio::select! {
                _ = cancel.cancelled() => {
                    stop = Some(StopReason::Cancelled);
                    break;
                }
                _ = &mut deadline => {
                    stop = Some(StopReason::TimedOut);
                    break;
                }
                line = stdout_lines.next_line(), if !stdout_done => match line {
                    Some(line) => self.observe(&job_id, &mut tracker, &line),
                    None => stdout_done = true,
                },
                line = stderr_lines.next_line(), if !stderr_done => match line {
                    Some(line) => {
                        self.observe(&job_id, &mut tracker, &line);
                        if is_error_candidate(&line) {
                            last_error = Some(truncate(line.trim()).to_string());
                        }
                    }
                    None => stderr_done = true,
                },
            }
        }

        let status = match stop {
            None => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(StopReason::Cancelled),
                    _ = &mut deadline => Err(StopReason::TimedOut),
                    status = child.wait() => Ok(status),
                }
            }
            Some(reason) => Err(reason),
        };

        let status = match status {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return self
                    .fail(job, format!("failed to wait for ffmpeg: {}", e))
                    .await;
            }
            Err(reason) => {
                let termination = terminate(&mut child, self.config.kill_grace).await;
                let message = match reason {
                    StopReason::Cancelled => {
                        info!(job_id = %job_id, ?termination, "ffmpeg cancelled");
                        CANCELLED_MESSAGE.to_string()
                    }
                    StopReason::TimedOut => {
                        warn!(job_id = %job_id, ?termination, "ffmpeg timed out");
                        format!(
                            "ffmpeg timed out after {}s",
                            self.config.job_timeout.as_secs()
                        )
                    }
                };
                return self.fail(job, message).await;
            }
        };

        if !status.success() {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown (terminated by signal)".to_string());
            let detail = last_error.unwrap_or_else(|| "no error output".to_string());
            return self
                .fail(
                    job,
                    format!("ffmpeg failed with exit code {}: {}", code, detail),
                )
                .await;
        }

        // The artifact must exist before the job becomes visible as completed.
        if !fs::is_file(&job.output_path).await {
            return self
                .fail(
                    job,
                    "ffmpeg exited successfully but the output file was not created".to_string(),
                )
                .await;
        }

        let expires_at = expiry(self.clock.now(), self.config.artifact_ttl);
        let recorded = self.registry.finish(
            &job_id,
            TaskStatus::Completed {
                artifact_path: job.output_path.clone(),
                expires_at,
            },
        );
        if recorded {
            info!(job_id = %job_id, %expires_at, "Mux completed");
        } else {
            debug!(job_id = %job_id, "Job was removed before completion was recorded");
        }
        JobOutcome::Completed
    }

    fn observe(&self, job_id: &JobId, tracker: &mut ProgressTracker, line: &str) {
        if let Some(percent) = tracker.observe(line) {
            self.registry.raise_progress(job_id, percent);
        }
    }

    async fn fail(&self, job: &Job, error: String) -> JobOutcome {
        if let Err(e) = fs::remove_file_if_exists(&job.output_path).await {
            warn!(job_id = %job.id, "Failed to remove partial output: {}", e);
        }

        let recorded = self.registry.finish(
            &job.id,
            TaskStatus::Failed {
                error: error.clone(),
            },
        );
        if recorded {
            warn!(job_id = %job.id, "Mux failed: {}", error);
        } else {
            debug!(job_id = %job.id, "Job was removed before failure was recorded: {}", error);
        }
        JobOutcome::Failed(error)
    }
}

/// Line reader over one ffmpeg pipe.
///
/// ffmpeg echoes metadata and file names in whatever encoding they came in, so
/// lines are decoded lossily instead of ending the stream on invalid UTF-8.
struct OutputLines<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> OutputLines<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    /// Next line without its terminator, or `None` at EOF or on a read error.
    ///
    /// Cancel safe: bytes of an interrupted read stay in `buf` and the next
    /// call continues the same line.
    async fn next_line(&mut self) -> Option<String> {
        match self.reader.read_until(b'\n', &mut self.buf).await {
            Ok(0) if self.buf.is_empty() => None,
            Ok(_) => {
                let mut end = self.buf.len();
                while end > 0 && matches!(self.buf[end - 1], b'\n' | b'\r') {
                    end -= 1;
                }
                let line = String::from_utf8_lossy(&self.buf[..end]).into_owned();
                self.buf.clear();
                Some(line)
            }
            Err(e) => {
                debug!("Stopped reading ffmpeg output: {}", e);
                None
            }
        }
    }
}

/// `now + ttl`, saturating at the latest representable instant.
fn expiry(now: DateTime<Utc>, ttl: chrono::Duration) -> DateTime<Utc> {
    now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Lines worth quoting in a failure message.
fn is_error_candidate(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && parse_line(trimmed).is_none()
}

async fn terminate(child: &mut Child, grace: Duration) -> Option<Termination> {
    match terminate_gracefully(child, grace).await {
        Ok(termination) => Some(termination),
        Err(e) => {
            warn!("Failed to terminate ffmpeg: {}", e);
            None
        }
    }
}

fn truncate(s: &str) -> &str {
    if s.len() <= MAX_ERROR_LINE_LEN {
        return s;
    }
    let mut end = MAX_ERROR_LINE_LEN;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
