//! HTTP API.
//!
//! Thin axum layer over [`crate::service::MuxService`].

pub mod error;
pub mod routes;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use server::{ApiServer, ApiServerConfig, AppState};
