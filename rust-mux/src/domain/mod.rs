//! Domain model: jobs, their inputs, and the status state machine.

pub mod job;
pub mod status;

pub use job::{
    ARTIFACT_MIME_TYPE, Job, JobId, JobInputs, OUTPUT_FILE_NAME, SUBTITLE_FILE_NAME,
};
pub use status::{JobStatusView, MAX_RUNNING_PERCENT, TaskRecord, TaskStatus};
