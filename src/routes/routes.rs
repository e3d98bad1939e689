//! Defines routes for the upload service.
//!
//! ## Structure
//! - **Chunked upload**
//!   - `POST /upload/check`    — store one chunk (`X-File-Id`, `X-Chunk-Number`, `X-Total-Chunks`)
//!   - `GET  /upload/status`   — chunk numbers received for `X-File-Id`
//!   - `POST /upload/complete` — merge into `X-File-Name` once `X-Total-Chunks` have arrived
//!
//! - **Whole files**
//!   - `POST /upload`          — single-request multipart upload
//!   - `GET  /media/{name}`    — download a completed file
//!
//! - **Probes**: `/ping`, `/healthz`, `/readyz`

use crate::{
    handlers::{
        health_handlers::{healthz, ping, readyz},
        upload_handlers::{
            complete_upload, download_file, upload_chunk, upload_file, upload_status,
        },
    },
    services::upload_service::UploadService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router for all upload routes.
///
/// The router carries shared state (`UploadService`) to all handlers.
/// `max_body_bytes` caps every request body, chunk uploads included.
pub fn routes(max_body_bytes: usize) -> Router<UploadService> {
    Router::new()
        .route("/ping", get(ping))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/upload", post(upload_file))
        .route("/upload/check", post(upload_chunk))
        .route("/upload/status", get(upload_status))
        .route("/upload/complete", post(complete_upload))
        .route("/media/{name}", get(download_file))
        .layer(DefaultBodyLimit::max(max_body_bytes))
}
