//! Bounded worker pool that turns queued jobs into supervised ffmpeg runs.
//!
//! `max_workers` workers pull from one FIFO queue. Each worker runs a single
//! supervisor at a time and rests for the cooldown before taking the next job
//! when more work is waiting. With one worker this is a serial queue with a
//! cooldown between jobs.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::job_queue::JobQueue;
use super::supervisor::{ActiveProcesses, JobOutcome, ProcessSupervisor};
use crate::domain::{JobId, TaskStatus};
use crate::registry::TaskRegistry;

/// Configuration for the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum concurrent ffmpeg processes.
    pub max_workers: usize,
    /// Pause between jobs while the queue is non-empty, in milliseconds.
    pub cooldown_ms: u64,
    /// Poll interval in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: 1,
            cooldown_ms: 5_000,
            poll_interval_ms: 500,
        }
    }
}

/// Everything a worker needs, shared across the pool.
struct WorkerContext {
    registry: Arc<TaskRegistry>,
    queue: Arc<JobQueue>,
    active: ActiveProcesses,
    supervisor: Arc<ProcessSupervisor>,
    shutdown: CancellationToken,
    running: AtomicUsize,
    peak_running: AtomicUsize,
}

/// Worker pool dispatching queued jobs.
pub struct Scheduler {
    config: SchedulerConfig,
    context: Arc<WorkerContext>,
    cancellation_token: CancellationToken,
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        registry: Arc<TaskRegistry>,
        queue: Arc<JobQueue>,
        active: ActiveProcesses,
        supervisor: Arc<ProcessSupervisor>,
    ) -> Self {
        let cancellation_token = CancellationToken::new();
        Self {
            config,
            context: Arc::new(WorkerContext {
                registry,
                queue,
                active,
                supervisor,
                shutdown: cancellation_token.clone(),
                running: AtomicUsize::new(0),
                peak_running: AtomicUsize::new(0),
            }),
            cancellation_token,
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
        }
    }

    /// Spawn the workers.
    pub fn start(&self) {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let cooldown = Duration::from_millis(self.config.cooldown_ms);
        let max_workers = self.config.max_workers.max(1);

        info!(
            "Starting mux scheduler with {} worker(s), cooldown {}ms",
            max_workers, self.config.cooldown_ms
        );

        let mut tasks = self.tasks.lock();
        let Some(join_set) = tasks.as_mut() else {
            debug!("Scheduler already stopped; not starting workers");
            return;
        };

        for i in 0..max_workers {
            let context = Arc::clone(&self.context);
            let cancellation_token = self.cancellation_token.clone();
            let notifier = context.queue.notifier();

            join_set.spawn(async move {
                debug!("Mux worker {} started", i);

                loop {
                    if cancellation_token.is_cancelled() {
                        break;
                    }

                    let Some(job_id) = context.queue.dequeue() else {
                        tokio::select! {
                            _ = cancellation_token.cancelled() => break,
                            _ = notifier.notified() => {}
                            _ = tokio::time::sleep(poll_interval) => {}
                        }
                        continue;
                    };

                    context.run_job(i, job_id).await;

                    if !context.queue.is_empty() && !cooldown.is_zero() {
                        debug!("Mux worker {} cooling down for {:?}", i, cooldown);
                        tokio::select! {
                            _ = cancellation_token.cancelled() => break,
                            _ = tokio::time::sleep(cooldown) => {}
                        }
                    }
                }

                debug!("Mux worker {} shutting down", i);
            });
        }
    }

    /// Stop the workers, cancelling any running ffmpeg process.
    pub async fn stop(&self) {
        info!("Stopping mux scheduler");
        self.cancellation_token.cancel();

        let cancelled = self.context.active.cancel_all_and_wait().await;
        if cancelled > 0 {
            info!("Cancelled {} running mux job(s)", cancelled);
        }

        let join_set = {
            let mut tasks = self.tasks.lock();
            tasks.take()
        };
        if let Some(mut join_set) = join_set {
            while join_set.join_next().await.is_some() {}
        }

        info!("Mux scheduler stopped");
    }

    /// Number of jobs currently being supervised.
    pub fn running_count(&self) -> usize {
        self.context.running.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously supervised jobs seen so far.
    pub fn peak_running(&self) -> usize {
        self.context.peak_running.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}

impl WorkerContext {
    async fn run_job(&self, worker: usize, job_id: JobId) {
        let Some(record) = self.registry.get(&job_id) else {
            debug!(job_id = %job_id, "Dequeued job no longer exists; skipping");
            return;
        };

        // Register before the status flips so a bulk clear always finds it.
        let (cancel, guard) = self.active.register(job_id, &self.shutdown);
        if !self.registry.begin_processing(&job_id) {
            debug!(job_id = %job_id, "Job is no longer queued; skipping");
            return;
        }

        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(running, Ordering::SeqCst);
        info!(job_id = %job_id, worker, "Processing mux job");

        // A panic inside the supervisor surfaces as a JoinError here.
        let supervisor = Arc::clone(&self.supervisor);
        let job = record.job;
        let result = tokio::spawn(async move { supervisor.run(&job, cancel).await }).await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        drop(guard);

        match result {
            Ok(JobOutcome::Completed) => debug!(job_id = %job_id, "Mux job finished"),
            Ok(JobOutcome::Failed(reason)) => {
                debug!(job_id = %job_id, "Mux job failed: {}", reason)
            }
            Err(e) => {
                error!(job_id = %job_id, "Mux job crashed: {}", e);
                self.registry.finish(
                    &job_id,
                    TaskStatus::Failed {
                        error: format!("internal error while supervising ffmpeg: {}", e),
                    },
                );
            }
        }
    }
}
