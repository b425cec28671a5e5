//! Mux job definition.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// File name of the muxed artifact inside a job's work directory.
pub const OUTPUT_FILE_NAME: &str = "output.mkv";

/// File name of the staged subtitle inside a job's work directory.
pub const SUBTITLE_FILE_NAME: &str = "subs.ass";

/// MIME type served for artifacts.
pub const ARTIFACT_MIME_TYPE: &str = "video/x-matroska";

/// Opaque job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Resolved inputs of a mux job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInputs {
    /// URL or path handed to ffmpeg as the first input.
    pub video_source: String,
    /// Subtitle file on stable storage.
    pub subtitle_path: PathBuf,
    /// Font file on stable storage.
    pub font_path: PathBuf,
}

impl JobInputs {
    pub fn new(
        video_source: impl Into<String>,
        subtitle_path: impl Into<PathBuf>,
        font_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            video_source: video_source.into(),
            subtitle_path: subtitle_path.into(),
            font_path: font_path.into(),
        }
    }
}

/// A unit of work submitted by a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub inputs: JobInputs,
    /// Caller-facing name; the download is offered as `<output_name>.mkv`.
    pub output_name: String,
    /// Storage partition owned by this job.
    pub work_dir: PathBuf,
    /// Where ffmpeg writes the artifact.
    pub output_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        id: JobId,
        inputs: JobInputs,
        output_name: impl Into<String>,
        work_dir: PathBuf,
        created_at: DateTime<Utc>,
    ) -> Self {
        let output_path = work_dir.join(OUTPUT_FILE_NAME);
        Self {
            id,
            inputs,
            output_name: output_name.into(),
            work_dir,
            output_path,
            created_at,
        }
    }

    /// Name offered to the browser for the artifact.
    pub fn download_name(&self) -> String {
        format!("{}.mkv", self.output_name)
    }
}
