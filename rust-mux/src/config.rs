//! Service configuration.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::pipeline::{RetentionConfig, SchedulerConfig, StorageRoots, SupervisorConfig};
use crate::{Error, Result};

/// Mux service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuxConfig {
    /// ffmpeg executable.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// Root for per-job work directories.
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,

    /// Root for cached fonts.
    #[serde(default = "default_fonts_dir")]
    pub fonts_dir: PathBuf,

    /// Terminal jobs allowed before submissions are refused.
    #[serde(default = "default_storage_limit")]
    pub storage_limit: usize,

    /// Seconds a completed artifact stays downloadable.
    #[serde(default = "default_artifact_ttl_secs")]
    pub artifact_ttl_secs: u64,

    /// Seconds between expiry sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Maximum concurrent ffmpeg processes.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Seconds a worker rests between jobs while more are queued.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Seconds between SIGTERM and SIGKILL.
    #[serde(default = "default_kill_grace_secs")]
    pub kill_grace_secs: u64,

    /// Upper bound on one ffmpeg run, in seconds.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// Delete a job's files once its artifact has been downloaded.
    #[serde(default = "default_cleanup_after_download")]
    pub cleanup_after_download: bool,
}

fn default_ffmpeg_path() -> String {
    resolve_ffmpeg_path(None, Path::new("."))
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("temp_uploads")
}

fn default_fonts_dir() -> PathBuf {
    PathBuf::from("temp_fonts")
}

fn default_storage_limit() -> usize {
    12
}

fn default_artifact_ttl_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    1800
}

fn default_max_workers() -> usize {
    1
}

fn default_cooldown_secs() -> u64 {
    5
}

fn default_kill_grace_secs() -> u64 {
    5
}

fn default_job_timeout_secs() -> u64 {
    7200 // 2 hours
}

fn default_cleanup_after_download() -> bool {
    true
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            uploads_dir: default_uploads_dir(),
            fonts_dir: default_fonts_dir(),
            storage_limit: default_storage_limit(),
            artifact_ttl_secs: default_artifact_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_workers: default_max_workers(),
            cooldown_secs: default_cooldown_secs(),
            kill_grace_secs: default_kill_grace_secs(),
            job_timeout_secs: default_job_timeout_secs(),
            cleanup_after_download: default_cleanup_after_download(),
        }
    }
}

/// Pick the ffmpeg executable.
///
/// An explicit path wins, then an `ffmpeg` binary next to the working
/// directory, then `ffmpeg` from `PATH`.
pub fn resolve_ffmpeg_path(explicit: Option<&str>, working_dir: &Path) -> String {
    if let Some(path) = explicit.map(str::trim).filter(|p| !p.is_empty()) {
        return path.to_string();
    }

    let local_name = if cfg!(windows) { "ffmpeg.exe" } else { "ffmpeg" };
    let local = working_dir.join(local_name);
    if local.is_file() {
        return local.to_string_lossy().into_owned();
    }

    "ffmpeg".to_string()
}

fn env_value<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid value for {}: {:?}", key, raw);
            None
        }
    }
}

impl MuxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `FFMPEG_PATH`
    /// - `MUX_UPLOADS_DIR`, `MUX_FONTS_DIR`
    /// - `MUX_STORAGE_LIMIT`
    /// - `MUX_ARTIFACT_TTL_SECS`, `MUX_SWEEP_INTERVAL_SECS`
    /// - `MUX_MAX_WORKERS`, `MUX_COOLDOWN_SECS`
    /// - `MUX_KILL_GRACE_SECS`, `MUX_JOB_TIMEOUT_SECS`
    /// - `MUX_CLEANUP_AFTER_DOWNLOAD`
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        let explicit_ffmpeg = std::env::var("FFMPEG_PATH").ok();
        config.ffmpeg_path = resolve_ffmpeg_path(explicit_ffmpeg.as_deref(), Path::new("."));

        if let Some(dir) = env_value::<PathBuf>("MUX_UPLOADS_DIR") {
            config.uploads_dir = dir;
        }
        if let Some(dir) = env_value::<PathBuf>("MUX_FONTS_DIR") {
            config.fonts_dir = dir;
        }
        if let Some(limit) = env_value("MUX_STORAGE_LIMIT") {
            config.storage_limit = limit;
        }
        if let Some(secs) = env_value("MUX_ARTIFACT_TTL_SECS") {
            config.artifact_ttl_secs = secs;
        }
        if let Some(secs) = env_value("MUX_SWEEP_INTERVAL_SECS") {
            config.sweep_interval_secs = secs;
        }
        if let Some(workers) = env_value("MUX_MAX_WORKERS") {
            config.max_workers = workers;
        }
        if let Some(secs) = env_value("MUX_COOLDOWN_SECS") {
            config.cooldown_secs = secs;
        }
        if let Some(secs) = env_value("MUX_KILL_GRACE_SECS") {
            config.kill_grace_secs = secs;
        }
        if let Some(secs) = env_value("MUX_JOB_TIMEOUT_SECS") {
            config.job_timeout_secs = secs;
        }
        if let Some(cleanup) = env_value("MUX_CLEANUP_AFTER_DOWNLOAD") {
            config.cleanup_after_download = cleanup;
        }

        config
    }

    pub fn with_ffmpeg_path(mut self, path: impl Into<String>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    /// Place both storage roots under `base`.
    pub fn with_storage_base(mut self, base: &Path) -> Self {
        self.uploads_dir = base.join("temp_uploads");
        self.fonts_dir = base.join("temp_fonts");
        self
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

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    pub fn with_cooldown_secs(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    pub fn with_kill_grace_secs(mut self, secs: u64) -> Self {
        self.kill_grace_secs = secs;
        self
    }

    pub fn with_job_timeout_secs(mut self, secs: u64) -> Self {
        self.job_timeout_secs = secs;
        self
    }

    pub fn with_cleanup_after_download(mut self, cleanup: bool) -> Self {
        self.cleanup_after_download = cleanup;
        self
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(Error::config("max_workers must be at least 1"));
        }
        if self.storage_limit == 0 {
            return Err(Error::config("storage_limit must be at least 1"));
        }
        if self.ffmpeg_path.trim().is_empty() {
            return Err(Error::config("ffmpeg_path must not be empty"));
        }
        if self.uploads_dir == self.fonts_dir {
            return Err(Error::config(
                "uploads_dir and fonts_dir must be different directories",
            ));
        }
        Ok(())
    }

    pub fn storage_roots(&self) -> StorageRoots {
        StorageRoots {
            uploads_dir: self.uploads_dir.clone(),
            fonts_dir: self.fonts_dir.clone(),
        }
    }

    pub fn retention_config(&self) -> RetentionConfig {
        RetentionConfig::new()
            .with_storage_limit(self.storage_limit)
            .with_artifact_ttl_secs(self.artifact_ttl_secs)
            .with_sweep_interval_secs(self.sweep_interval_secs)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_workers: self.max_workers,
            cooldown_ms: self.cooldown_secs.saturating_mul(1000),
            ..SchedulerConfig::default()
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            ffmpeg_path: self.ffmpeg_path.clone(),
            kill_grace: Duration::from_secs(self.kill_grace_secs),
            job_timeout: Duration::from_secs(self.job_timeout_secs),
            artifact_ttl: i64::try_from(self.artifact_ttl_secs)
                .ok()
                .and_then(chrono::Duration::try_seconds)
                .unwrap_or(chrono::Duration::MAX),
        }
    }
}
