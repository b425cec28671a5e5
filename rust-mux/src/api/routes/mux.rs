//! Mux job routes.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | POST | `/start-mux` | Upload inputs and queue a job |
//! | GET | `/progress/{task_id}` | Poll job status |
//! | GET | `/download/{task_id}` | Stream the finished MKV |
//! | POST | `/clear-data` | Cancel everything and wipe storage |

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Multipart, Path, Query, State, multipart::Field},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::Error;
use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::domain::{JobId, JobStatusView};
use crate::service::{MuxService, Submission};
use crate::storage::{FontSource, MuxUpload, UploadedFile};

/// Create the mux router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/start-mux", post(start_mux))
        .route("/progress/{task_id}", get(progress))
        .route("/download/{task_id}", get(download))
        .route("/clear-data", post(clear_data))
}

#[derive(Debug, Serialize)]
pub struct StartMuxResponse {
    pub task_id: String,
    pub queue_position: usize,
    pub font_name: Option<String>,
    pub storage_used: usize,
    pub storage_limit: usize,
}

impl From<Submission> for StartMuxResponse {
    fn from(submission: Submission) -> Self {
        Self {
            task_id: submission.job_id.to_string(),
            queue_position: submission.queue_position,
            font_name: submission.font_name,
            storage_used: submission.storage_used,
            storage_limit: submission.storage_limit,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ClearDataResponse {
    pub success: bool,
    pub message: String,
    pub storage_used: usize,
    pub storage_limit: usize,
    pub removed_jobs: usize,
    pub cancelled_processes: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct DownloadQuery {
    pub filename: Option<String>,
}

/// Multipart fields of a `/start-mux` request.
#[derive(Debug, Default)]
struct MuxForm {
    video_url: Option<String>,
    subtitle: Option<UploadedFile>,
    font: Option<UploadedFile>,
    cached_font_name: Option<String>,
    output_filename: Option<String>,
}

impl MuxForm {
    async fn read(multipart: &mut Multipart) -> ApiResult<Self> {
        let mut form = Self::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {e}")))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            match name.as_str() {
                "video_url" => form.video_url = Some(field_text(field).await?),
                "subtitle_file" => form.subtitle = field_file(field).await?,
                "font_file" => form.font = field_file(field).await?,
                "cached_font_name" => form.cached_font_name = Some(field_text(field).await?),
                "output_filename" => form.output_filename = Some(field_text(field).await?),
                _ => {}
            }
        }

        Ok(form)
    }

    fn into_upload(self) -> crate::Result<MuxUpload> {
        let video_url = self
            .video_url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| Error::validation("Missing video URL"))?;
        let subtitle = self
            .subtitle
            .ok_or_else(|| Error::validation("Missing subtitle file"))?;

        // An uploaded font wins over a cached name.
        let font = match (self.font, self.cached_font_name) {
            (Some(file), _) => FontSource::Upload(file),
            (None, Some(name)) if !name.trim().is_empty() => {
                FontSource::Cached(name.trim().to_string())
            }
            _ => return Err(Error::validation("Missing font file")),
        };

        Ok(MuxUpload {
            video_url,
            subtitle,
            font,
            output_name: self.output_filename,
        })
    }
}

async fn field_text(field: Field<'_>) -> ApiResult<String> {
    field
        .text()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart field: {e}")))
}

/// A file part with no name or no content counts as absent.
async fn field_file(field: Field<'_>) -> ApiResult<Option<UploadedFile>> {
    let file_name = field.file_name().unwrap_or_default().to_string();
    let data = field
        .bytes()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart field: {e}")))?;

    if file_name.trim().is_empty() || data.is_empty() {
        return Ok(None);
    }
    Ok(Some(UploadedFile::new(file_name, data.to_vec())))
}

fn parse_task_id(raw: &str) -> ApiResult<JobId> {
    raw.parse()
        .map_err(|_| ApiError::not_found(format!("Task with id '{}' not found", raw)))
}

/// Queue a mux job.
///
/// The quota is checked before the body is read so a full server does not
/// buffer uploads it is going to reject.
async fn start_mux(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<StartMuxResponse>)> {
    state.mux.retention().check_admission()?;

    let upload = MuxForm::read(&mut multipart).await?.into_upload()?;
    let submission = state.mux.submit_upload(upload).await?;

    Ok((StatusCode::ACCEPTED, Json(submission.into())))
}

async fn progress(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<JobStatusView>> {
    let id = parse_task_id(&task_id)?;
    Ok(Json(state.mux.status(&id)?))
}

async fn download(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> ApiResult<Response> {
    let id = parse_task_id(&task_id)?;
    let artifact = state.mux.artifact(&id, query.filename.as_deref()).await?;

    let file = tokio::fs::File::open(&artifact.path)
        .await
        .map_err(|e| Error::io_path("opening artifact", &artifact.path, e))?;
    let len = file
        .metadata()
        .await
        .map_err(|e| Error::io_path("reading artifact metadata", &artifact.path, e))?
        .len();

    let stream = ReaderStream::new(file);
    let body = if state.mux.cleanup_after_download() {
        let guard = DiscardOnDrop {
            mux: Arc::clone(&state.mux),
            job_id: id,
        };
        Body::from_stream(stream.map(move |chunk| {
            let _held = &guard;
            chunk
        }))
    } else {
        Body::from_stream(stream)
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(artifact.mime_type),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&content_disposition(&artifact.download_name))
            .map_err(|e| ApiError::internal(format!("Invalid header value: {e}")))?,
    );

    info!(job_id = %id, size = len, "Serving artifact");
    Ok((headers, body).into_response())
}

async fn clear_data(State(state): State<AppState>) -> ApiResult<Json<ClearDataResponse>> {
    let summary = state.mux.clear_all().await?;
    let usage = state.mux.storage_usage();

    Ok(Json(ClearDataResponse {
        success: true,
        message: format!(
            "Cleared {} tasks and cancelled {} running processes",
            summary.removed_jobs, summary.cancelled_processes
        ),
        storage_used: usage.used,
        storage_limit: usage.limit,
        removed_jobs: summary.removed_jobs,
        cancelled_processes: summary.cancelled_processes,
    }))
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 UTF-8 name.
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(name)
    )
}

/// Discards the job's storage once the response body is dropped.
struct DiscardOnDrop {
    mux: Arc<MuxService>,
    job_id: JobId,
}

impl Drop for DiscardOnDrop {
    fn drop(&mut self) {
        let mux = Arc::clone(&self.mux);
        let job_id = self.job_id;
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(job_id = %job_id, "No runtime to discard downloaded job");
            return;
        };
        handle.spawn(async move {
            if let Err(e) = mux.discard(&job_id).await {
                warn!(job_id = %job_id, error = %e, "Failed to discard downloaded job");
            }
        });
    }
}
