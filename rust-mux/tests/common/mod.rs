//! Shared helpers for the integration tests.
//!
//! ffmpeg is replaced by small shell scripts. They are all written once, up
//! front, so no test forks while another still holds a script open for
//! writing (which fails the exec with ETXTBSY).

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::Utc;
use rust_mux::clock::ManualClock;
use rust_mux::config::MuxConfig;
use rust_mux::domain::{JobId, JobInputs, JobStatusView};
use rust_mux::service::{MuxService, Submission};
use tempfile::TempDir;

/// Fake ffmpeg behaviours.
#[derive(Debug, Clone, Copy)]
pub enum FakeFfmpeg {
    /// Reports progress on both pipes, then writes the output.
    Ok,
    /// Writes the output straight away.
    Instant,
    /// Prints an error and exits 1.
    Fail,
    /// Exits 0 without writing anything.
    NoOutput,
    /// Runs until signalled.
    Hang,
    /// Ignores SIGTERM and runs until killed.
    Stubborn,
    /// Prints a Latin-1 line and well over a pipe buffer of stderr, then
    /// writes the output.
    Noisy,
}

impl FakeFfmpeg {
    fn file_name(self) -> &'static str {
        match self {
            Self::Ok => "ffmpeg-ok",
            Self::Instant => "ffmpeg-instant",
            Self::Fail => "ffmpeg-fail",
            Self::NoOutput => "ffmpeg-no-output",
            Self::Hang => "ffmpeg-hang",
            Self::Stubborn => "ffmpeg-stubborn",
            Self::Noisy => "ffmpeg-noisy",
        }
    }

    fn body(self) -> &'static str {
        match self {
            Self::Ok => {
                r#"for last; do :; done
echo "  Duration: 00:00:10.00, start: 0.000000, bitrate: 1000 kb/s" >&2
sleep 0.05
for t in 00:00:02.50 00:00:05.00 00:00:07.50 00:00:09.90; do
  echo "out_time=$t"
  echo "frame=1 fps=0.0 q=-1.0 size=1kB time=$t bitrate=1.0kbits/s" >&2
  sleep 0.05
done
echo "progress=end"
printf 'matroska' > "$last"
"#
            }
            Self::Instant => {
                r#"for last; do :; done
printf 'matroska' > "$last"
"#
            }
            Self::Fail => {
                r#"echo "  Duration: 00:00:10.00, start: 0.000000" >&2
echo "input.mp4: Invalid data found when processing input" >&2
exit 1
"#
            }
            Self::NoOutput => "exit 0\n",
            Self::Hang => {
                r#"echo "  Duration: 00:01:00.00, start: 0.000000" >&2
exec sleep 30
"#
            }
            Self::Stubborn => {
                r#"trap '' TERM
exec sleep 30
"#
            }
            Self::Noisy => {
                r#"for last; do :; done
printf 'Metadata: title=\351t\351\n' >&2
i=0
while [ $i -lt 3000 ]; do
  echo "    encoder         : Lavf60.16.100 stream $i" >&2
  i=$((i+1))
done
printf 'matroska' > "$last"
"#
            }
        }
    }

    /// Path of the script.
    pub fn path(self) -> PathBuf {
        scripts_dir().join(self.file_name())
    }
}

fn scripts_dir() -> &'static Path {
    static DIR: OnceLock<TempDir> = OnceLock::new();
    DIR.get_or_init(|| {
        let dir = tempfile::tempdir().expect("create script dir");
        for fake in [
            FakeFfmpeg::Ok,
            FakeFfmpeg::Instant,
            FakeFfmpeg::Fail,
            FakeFfmpeg::NoOutput,
            FakeFfmpeg::Hang,
            FakeFfmpeg::Stubborn,
            FakeFfmpeg::Noisy,
        ] {
            let path = dir.path().join(fake.file_name());
            std::fs::write(&path, format!("#!/bin/sh\n{}", fake.body())).expect("write script");
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .expect("chmod script");
        }
        dir
    })
    .path()
}

/// A running service over a private storage root.
pub struct Harness {
    pub dir: TempDir,
    pub clock: ManualClock,
    pub mux: Arc<MuxService>,
}

impl Harness {
    pub async fn start(fake: FakeFfmpeg) -> Self {
        Self::start_with(fake, |config| config).await
    }

    pub async fn start_with(fake: FakeFfmpeg, tweak: impl FnOnce(MuxConfig) -> MuxConfig) -> Self {
        Self::start_with_ffmpeg(&fake.path().to_string_lossy(), tweak).await
    }

    pub async fn start_with_ffmpeg(
        ffmpeg: &str,
        tweak: impl FnOnce(MuxConfig) -> MuxConfig,
    ) -> Self {
        let dir = tempfile::tempdir().expect("create storage dir");
        let clock = ManualClock::new(Utc::now());
        let config = tweak(
            MuxConfig::default()
                .with_ffmpeg_path(ffmpeg)
                .with_storage_base(dir.path())
                .with_cooldown_secs(0)
                .with_kill_grace_secs(1),
        );

        let mux = Arc::new(
            MuxService::with_clock(config, Arc::new(clock.clone())).expect("build service"),
        );
        mux.start().await.expect("start service");

        Self { dir, clock, mux }
    }

    /// Submit a job whose inputs are plain files in the storage root.
    pub async fn submit(&self, name: &str) -> Submission {
        self.try_submit(name).await.expect("submission accepted")
    }

    pub async fn try_submit(&self, name: &str) -> rust_mux::Result<Submission> {
        let subs = self.dir.path().join("input.ass");
        let font = self.dir.path().join("input.ttf");
        std::fs::write(&subs, b"[Script Info]").expect("write subtitle");
        std::fs::write(&font, b"font").expect("write font");

        self.mux
            .submit(
                JobInputs::new("https://cdn.example/video.mp4", subs, font),
                name,
            )
            .await
    }

    /// Poll until the job completes or fails.
    pub async fn wait_terminal(&self, id: &JobId) -> JobStatusView {
        wait_until(|| match self.mux.status(id) {
            Ok(view @ (JobStatusView::Completed { .. } | JobStatusView::Failed { .. })) => {
                Some(view)
            }
            _ => None,
        })
        .await
    }

    pub async fn wait_processing(&self, id: &JobId) {
        wait_until(|| match self.mux.status(id) {
            Ok(JobStatusView::Processing { .. }) => Some(()),
            _ => None,
        })
        .await
    }
}

/// Poll `probe` every 10ms for up to 15s.
pub async fn wait_until<T>(mut probe: impl FnMut() -> Option<T>) -> T {
    tokio::time::timeout(Duration::from_secs(15), async {
        loop {
            if let Some(value) = probe() {
                return value;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time")
}
