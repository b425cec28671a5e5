//! Health check routes.

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::api::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub processing: usize,
    pub max_workers: usize,
    pub storage_used: usize,
    pub storage_limit: usize,
}

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(liveness_check))
}

/// Liveness check, always 200 while the process serves requests.
async fn liveness_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let usage = state.mux.storage_usage();

    Json(HealthResponse {
        status: "alive",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.start_time.elapsed().as_secs(),
        processing: state.mux.registry().processing_count(),
        max_workers: state.mux.scheduler().config().max_workers,
        storage_used: usage.used,
        storage_limit: usage.limit,
    })
}
