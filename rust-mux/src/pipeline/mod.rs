//! Job execution pipeline.
//!
//! - [`progress`]: ffmpeg diagnostic line parsing
//! - [`ffmpeg`]: mux command construction
//! - [`supervisor`]: one ffmpeg run from spawn to terminal status
//! - [`job_queue`] and [`scheduler`]: bounded dispatch of queued jobs
//! - [`retention`]: quota, expiry sweep and bulk clear

pub mod ffmpeg;
pub mod job_queue;
pub mod progress;
pub mod retention;
pub mod scheduler;
pub mod supervisor;

pub use job_queue::JobQueue;
pub use progress::{ProgressEvent, ProgressTracker};
pub use retention::{ClearSummary, RetentionConfig, RetentionManager, StorageRoots};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use supervisor::{
    ActiveProcessGuard, ActiveProcesses, CANCELLED_MESSAGE, JobOutcome, ProcessSupervisor,
    SupervisorConfig,
};
