//! HTTP API tests driven through the router without a socket.

#![cfg(unix)]

mod common;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use common::{FakeFfmpeg, Harness, wait_until};
use rust_mux::api::{ApiServer, ApiServerConfig, AppState};
use serde_json::Value;
use tower::ServiceExt;

const BOUNDARY: &str = "rust-mux-test-boundary";

fn router(h: &Harness) -> Router {
    ApiServer::new(
        ApiServerConfig::default(),
        AppState::new(std::sync::Arc::clone(&h.mux)),
    )
    .build_router()
}

/// Minimal multipart/form-data encoder: `(name, Some(filename), content)`.
fn multipart(parts: &[(&str, Option<&str>, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, file_name, data) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match file_name {
            Some(file_name) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(data.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn start_mux_request(parts: &[(&str, Option<&str>, &str)]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/start-mux")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart(parts)))
        .unwrap()
}

fn full_upload() -> Vec<(&'static str, Option<&'static str>, &'static str)> {
    vec![
        ("video_url", None, "https://cdn.example/video.mp4"),
        ("subtitle_file", Some("episode.ass"), "[Script Info]"),
        ("font_file", Some("Font.ttf"), "font-bytes"),
        ("output_filename", None, "Episode 01"),
    ]
}

async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

async fn get(router: &Router, uri: &str) -> Response {
    send(router, Request::get(uri).body(Body::empty()).unwrap()).await
}

async fn json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn submit_and_complete(h: &Harness, router: &Router) -> String {
    let response = send(router, start_mux_request(&full_upload())).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let task_id = json(response).await["task_id"]
        .as_str()
        .unwrap()
        .to_string();

    let id = task_id.parse().unwrap();
    h.wait_terminal(&id).await;
    task_id
}

#[tokio::test]
async fn test_health_reports_alive() {
    let h = Harness::start(FakeFfmpeg::Instant).await;
    let response = get(&router(&h), "/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json(response).await;
    assert_eq!(body["status"], "alive");
    assert_eq!(body["storage_limit"], 12);
    h.mux.shutdown().await;
}

#[tokio::test]
async fn test_upload_poll_and_download() {
    let h = Harness::start(FakeFfmpeg::Instant).await;
    let router = router(&h);

    let response = send(&router, start_mux_request(&full_upload())).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json(response).await;
    assert_eq!(body["storage_used"], 0);
    assert!(body["font_name"].as_str().unwrap().ends_with("_Font.ttf"));
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let progress_uri = format!("/progress/{task_id}");
    let mut completed = None;
    for _ in 0..500 {
        let body = json(get(&router, &progress_uri).await).await;
        if body["status"] == "completed" {
            completed = Some(body);
            break;
        }
        assert_ne!(body["status"], "error", "{body}");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(completed.unwrap()["progress"], 100);

    let response = get(&router, &format!("/download/{task_id}?filename=Episode%2001")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "video/x-matroska"
    );
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "8");
    let disposition = response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment; filename=\"Episode 01.mkv\""));

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"matroska");

    // The job is discarded once the body has been sent.
    let id = task_id.parse().unwrap();
    wait_until(|| h.mux.registry().get(&id).is_none().then_some(())).await;
    assert_eq!(
        get(&router, &format!("/download/{task_id}")).await.status(),
        StatusCode::NOT_FOUND
    );
    h.mux.shutdown().await;
}

#[tokio::test]
async fn test_cached_font_can_be_reused() {
    let h = Harness::start(FakeFfmpeg::Instant).await;
    let router = router(&h);

    let first = json(send(&router, start_mux_request(&full_upload())).await).await;
    let font_name = first["font_name"].as_str().unwrap().to_string();

    let response = send(
        &router,
        start_mux_request(&[
            ("video_url", None, "https://cdn.example/next.mp4"),
            ("subtitle_file", Some("next.ass"), "[Script Info]"),
            ("cached_font_name", None, font_name.as_str()),
        ]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(json(response).await["font_name"], font_name.as_str());
    h.mux.shutdown().await;
}

#[tokio::test]
async fn test_invalid_uploads_are_rejected() {
    let h = Harness::start(FakeFfmpeg::Instant).await;
    let router = router(&h);

    let no_font = send(
        &router,
        start_mux_request(&[
            ("video_url", None, "https://cdn.example/video.mp4"),
            ("subtitle_file", Some("episode.ass"), "[Script Info]"),
        ]),
    )
    .await;
    assert_eq!(no_font.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(no_font).await["code"], "VALIDATION_ERROR");

    let wrong_subtitle = send(
        &router,
        start_mux_request(&[
            ("video_url", None, "https://cdn.example/video.mp4"),
            ("subtitle_file", Some("episode.srt"), "1\n00:00:01,000"),
            ("font_file", Some("Font.ttf"), "font-bytes"),
        ]),
    )
    .await;
    assert_eq!(wrong_subtitle.status(), StatusCode::BAD_REQUEST);

    assert!(h.mux.registry().is_empty());
    h.mux.shutdown().await;
}

#[tokio::test]
async fn test_unknown_tasks_are_not_found() {
    let h = Harness::start(FakeFfmpeg::Instant).await;
    let router = router(&h);

    let unknown = uuid::Uuid::new_v4().simple().to_string();
    for uri in [
        format!("/progress/{unknown}"),
        "/progress/not-a-task".to_string(),
        format!("/download/{unknown}"),
    ] {
        let response = get(&router, &uri).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(json(response).await["code"], "NOT_FOUND");
    }
    h.mux.shutdown().await;
}

#[tokio::test]
async fn test_download_before_completion_is_not_ready() {
    let h = Harness::start(FakeFfmpeg::Hang).await;
    let router = router(&h);

    let body = json(send(&router, start_mux_request(&full_upload())).await).await;
    let task_id = body["task_id"].as_str().unwrap();

    let response = get(&router, &format!("/download/{task_id}")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response).await["code"], "NOT_READY");
    h.mux.shutdown().await;
}

#[tokio::test]
async fn test_full_storage_is_forbidden_until_cleared() {
    let h = Harness::start_with(FakeFfmpeg::Instant, |c| c.with_storage_limit(1)).await;
    let router = router(&h);
    submit_and_complete(&h, &router).await;

    let response = send(&router, start_mux_request(&full_upload())).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = json(response).await;
    assert_eq!(body["code"], "STORAGE_FULL");
    assert_eq!(body["details"]["storage_used"], 1);
    assert_eq!(body["details"]["storage_limit"], 1);

    let response = send(
        &router,
        Request::post("/clear-data").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["storage_used"], 0);
    assert_eq!(body["removed_jobs"], 1);

    let response = send(&router, start_mux_request(&full_upload())).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    h.mux.shutdown().await;
}

#[tokio::test]
async fn test_expired_download_is_gone() {
    let h = Harness::start_with(FakeFfmpeg::Instant, |c| c.with_artifact_ttl_secs(60)).await;
    let router = router(&h);
    let task_id = submit_and_complete(&h, &router).await;

    h.clock.advance(chrono::Duration::seconds(61));

    let response = get(&router, &format!("/download/{task_id}")).await;
    assert_eq!(response.status(), StatusCode::GONE);
    assert_eq!(json(response).await["code"], "EXPIRED");

    let response = get(&router, &format!("/progress/{task_id}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    h.mux.shutdown().await;
}
