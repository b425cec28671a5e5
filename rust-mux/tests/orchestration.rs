//! End-to-end tests of job orchestration against fake ffmpeg scripts.

#![cfg(unix)]

mod common;

use std::time::{Duration, Instant};

use common::{FakeFfmpeg, Harness, wait_until};
use rust_mux::Error;
use rust_mux::domain::{JobStatusView, TaskStatus};
use rust_mux::storage::{FontSource, MuxUpload, UploadedFile};

mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_progress_is_monotonic_and_ends_at_100() {
        let h = Harness::start(FakeFfmpeg::Ok).await;
        let submission = h.submit("Episode 01").await;
        assert_eq!(submission.storage_used, 0);

        let mut seen = Vec::new();
        let last = wait_until(|| {
            let view = h.mux.status(&submission.job_id).ok()?;
            let progress = match &view {
                JobStatusView::Queued { .. } => 0,
                JobStatusView::Processing { progress } => *progress,
                JobStatusView::Completed { progress } => *progress,
                JobStatusView::Failed { error } => panic!("job failed: {error}"),
            };
            seen.push(progress);
            matches!(view, JobStatusView::Completed { .. }).then_some(view)
        })
        .await;

        assert_eq!(last, JobStatusView::Completed { progress: 100 });
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {seen:?}");
        assert!(seen[..seen.len() - 1].iter().all(|p| *p <= 99));

        let artifact = h.mux.artifact(&submission.job_id, None).await.unwrap();
        assert_eq!(artifact.download_name, "Episode 01.mkv");
        assert_eq!(artifact.mime_type, "video/x-matroska");
        assert_eq!(std::fs::read(&artifact.path).unwrap(), b"matroska");
        assert_eq!(h.mux.storage_usage().used, 1);

        h.mux.shutdown().await;
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_last_error_line() {
        let h = Harness::start(FakeFfmpeg::Fail).await;
        let id = h.submit("broken").await.job_id;

        let JobStatusView::Failed { error } = h.wait_terminal(&id).await else {
            panic!("expected failure");
        };
        assert!(error.contains("failed with exit code 1"), "{error}");
        assert!(error.contains("Invalid data found"), "{error}");

        // Failed jobs still count against the quota.
        assert_eq!(h.mux.storage_usage().used, 1);
        assert!(matches!(
            h.mux.artifact(&id, None).await,
            Err(Error::NotReady(_))
        ));
        h.mux.shutdown().await;
    }

    #[tokio::test]
    async fn test_clean_exit_without_output_fails() {
        let h = Harness::start(FakeFfmpeg::NoOutput).await;
        let id = h.submit("empty").await.job_id;

        let JobStatusView::Failed { error } = h.wait_terminal(&id).await else {
            panic!("expected failure");
        };
        assert!(error.contains("output file was not created"), "{error}");
        h.mux.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_binary_fails_job() {
        let h = Harness::start_with_ffmpeg("/nonexistent/bin/ffmpeg", |c| c).await;
        let id = h.submit("nothing").await.job_id;

        let JobStatusView::Failed { error } = h.wait_terminal(&id).await else {
            panic!("expected failure");
        };
        assert!(error.starts_with("failed to spawn ffmpeg"), "{error}");
        h.mux.shutdown().await;
    }

    #[tokio::test]
    async fn test_job_timeout_terminates_process() {
        let h = Harness::start_with(FakeFfmpeg::Hang, |c| c.with_job_timeout_secs(1)).await;
        let id = h.submit("slow").await.job_id;

        let JobStatusView::Failed { error } = h.wait_terminal(&id).await else {
            panic!("expected failure");
        };
        assert!(error.contains("timed out"), "{error}");
        h.mux.shutdown().await;
    }

    #[tokio::test]
    async fn test_undecodable_output_is_still_drained() {
        let h = Harness::start_with(FakeFfmpeg::Noisy, |c| c.with_job_timeout_secs(10)).await;
        let id = h.submit("noisy").await.job_id;

        let started = Instant::now();
        assert_eq!(
            h.wait_terminal(&id).await,
            JobStatusView::Completed { progress: 100 }
        );
        assert!(started.elapsed() < Duration::from_secs(10));
        h.mux.shutdown().await;
    }

    #[tokio::test]
    async fn test_huge_ttl_saturates_expiry() {
        let h = Harness::start_with(FakeFfmpeg::Instant, |c| {
            c.with_artifact_ttl_secs(10_000_000_000_000)
        })
        .await;
        let id = h.submit("forever").await.job_id;

        assert_eq!(
            h.wait_terminal(&id).await,
            JobStatusView::Completed { progress: 100 }
        );
        let Some(TaskStatus::Completed { expires_at, .. }) = h.mux.registry().status(&id) else {
            panic!("expected a completed record");
        };
        assert_eq!(expires_at, chrono::DateTime::<chrono::Utc>::MAX_UTC);
        assert!(h.mux.artifact(&id, None).await.is_ok());
        h.mux.shutdown().await;
    }

    #[tokio::test]
    async fn test_artifact_name_must_match() {
        let h = Harness::start(FakeFfmpeg::Instant).await;
        let id = h.submit("Show").await.job_id;
        h.wait_terminal(&id).await;

        assert!(h.mux.artifact(&id, Some("Show")).await.is_ok());
        assert!(h.mux.artifact(&id, Some("Show.mkv")).await.is_ok());
        assert!(matches!(
            h.mux.artifact(&id, Some("Other.mkv")).await,
            Err(Error::Validation(_))
        ));
        h.mux.shutdown().await;
    }
}

mod scheduling_tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_positions_follow_submission_order() {
        let h = Harness::start(FakeFfmpeg::Hang).await;
        let first = h.submit("a").await.job_id;
        h.wait_processing(&first).await;

        let second = h.submit("b").await.job_id;
        let third = h.submit("c").await.job_id;
        assert_eq!(
            h.mux.status(&second).unwrap(),
            JobStatusView::Queued { position: 1 }
        );
        assert_eq!(
            h.mux.status(&third).unwrap(),
            JobStatusView::Queued { position: 2 }
        );
        h.mux.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_worker_count() {
        let h = Harness::start_with(FakeFfmpeg::Ok, |c| c.with_max_workers(2)).await;

        let mut ids = Vec::new();
        for i in 0..6 {
            ids.push(h.submit(&format!("job {i}")).await.job_id);
        }
        for id in &ids {
            assert!(matches!(
                h.wait_terminal(id).await,
                JobStatusView::Completed { .. }
            ));
        }

        let peak = h.mux.scheduler().peak_running();
        assert!((1..=2).contains(&peak), "peak concurrency was {peak}");
        wait_until(|| (h.mux.scheduler().running_count() == 0).then_some(())).await;
        h.mux.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_cancels_running_job() {
        let h = Harness::start(FakeFfmpeg::Hang).await;
        let id = h.submit("stuck").await.job_id;
        h.wait_processing(&id).await;

        h.mux.shutdown().await;
        assert_eq!(
            h.mux.registry().status(&id),
            Some(TaskStatus::Failed {
                error: "cancelled".to_string()
            })
        );
        assert!(!h.mux.scheduler().is_running());
    }
}

mod retention_tests {
    use super::*;

    #[tokio::test]
    async fn test_quota_rejects_then_clear_readmits() {
        let h = Harness::start_with(FakeFfmpeg::Instant, |c| c.with_max_workers(4)).await;

        let mut ids = Vec::new();
        for i in 0..12 {
            ids.push(h.submit(&format!("job {i}")).await.job_id);
        }
        for id in &ids {
            h.wait_terminal(id).await;
        }
        assert_eq!(h.mux.storage_usage().used, 12);

        let uploads = h.dir.path().join("temp_uploads");
        let staged_before = std::fs::read_dir(&uploads).unwrap().count();
        let rejected = h.try_submit("job 12").await;
        assert_eq!(std::fs::read_dir(&uploads).unwrap().count(), staged_before);
        assert!(matches!(
            rejected,
            Err(Error::StorageFull {
                used: 12,
                limit: 12
            })
        ));

        let summary = h.mux.clear_all().await.unwrap();
        assert_eq!(summary.removed_jobs, 12);
        assert_eq!(h.mux.storage_usage().used, 0);

        let accepted = h.submit("job 12").await;
        assert_eq!(accepted.storage_used, 0);
        h.mux.shutdown().await;
    }

    #[tokio::test]
    async fn test_expired_artifact_is_gone_then_swept() {
        let h = Harness::start_with(FakeFfmpeg::Instant, |c| c.with_artifact_ttl_secs(60)).await;
        let id = h.submit("short lived").await.job_id;
        h.wait_terminal(&id).await;
        let work_dir = h.mux.registry().get(&id).unwrap().job.work_dir;
        assert!(work_dir.exists());

        h.clock.advance(chrono::Duration::seconds(59));
        assert!(h.mux.artifact(&id, None).await.is_ok());

        h.clock.advance(chrono::Duration::seconds(1));
        assert!(matches!(h.mux.status(&id), Err(Error::NotFound { .. })));
        assert!(matches!(
            h.mux.artifact(&id, None).await,
            Err(Error::Expired(_))
        ));

        assert_eq!(h.mux.sweep_expired().await.unwrap(), 1);
        assert!(!work_dir.exists());
        assert!(matches!(
            h.mux.artifact(&id, None).await,
            Err(Error::NotFound { .. })
        ));
        h.mux.shutdown().await;
    }

    #[tokio::test]
    async fn test_clear_all_cancels_running_and_queued_jobs() {
        let h = Harness::start_with(FakeFfmpeg::Hang, |c| c.with_max_workers(2)).await;
        let a = h.submit("a").await.job_id;
        let b = h.submit("b").await.job_id;
        h.submit("c").await;
        h.wait_processing(&a).await;
        h.wait_processing(&b).await;

        let summary = h.mux.clear_all().await.unwrap();
        assert_eq!(summary.cancelled_processes, 2);
        assert_eq!(summary.dequeued_jobs, 1);
        assert_eq!(summary.removed_jobs, 3);

        assert!(h.mux.registry().is_empty());
        assert_eq!(h.mux.storage_usage().used, 0);
        let uploads = h.dir.path().join("temp_uploads");
        assert_eq!(std::fs::read_dir(&uploads).unwrap().count(), 0);

        // Late completions of the cancelled runs must not resurrect entries.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.mux.registry().is_empty());
        h.mux.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_staging_removes_uploaded_font() {
        let h = Harness::start(FakeFfmpeg::Instant).await;
        let uploads = h.dir.path().join("temp_uploads");
        let fonts = h.dir.path().join("temp_fonts");
        std::fs::remove_dir_all(&uploads).unwrap();
        std::fs::write(&uploads, b"not a directory").unwrap();

        let result = h
            .mux
            .submit_upload(MuxUpload {
                video_url: "https://cdn.example/video.mp4".into(),
                subtitle: UploadedFile::new("episode.ass", b"[Script Info]".to_vec()),
                font: FontSource::Upload(UploadedFile::new("Font.ttf", b"font".to_vec())),
                output_name: None,
            })
            .await;

        assert!(result.is_err());
        assert!(h.mux.registry().is_empty());
        let cached = std::fs::read_dir(&fonts).map(|d| d.count()).unwrap_or(0);
        assert_eq!(cached, 0);
        h.mux.shutdown().await;
    }

    #[tokio::test]
    async fn test_clear_all_kills_process_ignoring_sigterm() {
        let h = Harness::start(FakeFfmpeg::Stubborn).await;
        let id = h.submit("stubborn").await.job_id;
        h.wait_processing(&id).await;

        let started = Instant::now();
        let summary = h.mux.clear_all().await.unwrap();
        assert_eq!(summary.cancelled_processes, 1);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(h.mux.registry().is_empty());
        h.mux.shutdown().await;
    }
}
