//! HTTP handlers for the chunked and single-shot upload endpoints.
//! Multipart bodies are streamed to disk; the service layer owns all state.

use crate::{
    errors::AppError,
    models::{
        requests::{ChunkUpload, CompleteUpload, FileName, StatusQuery, ValidationError},
        session::UploadSession,
    },
    services::upload_service::UploadService,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State, multipart::MultipartRejection},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use futures::StreamExt;
use serde::Serialize;
use std::{io, path::Path as FsPath};
use tokio_util::io::ReaderStream;

/// Multipart field carrying the payload on every upload route.
const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize)]
pub struct ChunkResponse {
    pub message: String,
    pub chunk: u32,
    pub size_bytes: u64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub uploaded: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<UploadSession>,
}

#[derive(Debug, Serialize)]
pub struct CompleteResponse {
    pub message: String,
    pub path: String,
    pub url: String,
    pub size_bytes: u64,
    pub etag: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub path: String,
    pub url: String,
}

/// `POST /upload/check` — store one chunk.
pub async fn upload_chunk(
    State(service): State<UploadService>,
    req: ChunkUpload,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ChunkResponse>, AppError> {
    let mut multipart = multipart.map_err(|err| AppError::invalid_input(err.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::invalid_input(err.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let stream = field.map(|res| res.map_err(io::Error::other));
        let receipt = service.receive_chunk(&req, stream).await?;
        return Ok(Json(ChunkResponse {
            message: "Chunk uploaded successfully".into(),
            chunk: receipt.chunk_number,
            size_bytes: receipt.size_bytes,
        }));
    }

    Err(ValidationError::MissingFile.into())
}

/// `GET /upload/status` — chunk numbers received so far, ascending.
pub async fn upload_status(
    State(service): State<UploadService>,
    req: StatusQuery,
) -> Result<Json<StatusResponse>, AppError> {
    let status = service.session_status(&req.session_id).await?;
    Ok(Json(StatusResponse {
        uploaded: status.uploaded.into_iter().collect(),
        session: status.session,
    }))
}

/// `POST /upload/complete` — merge all chunks into the named file.
pub async fn complete_upload(
    State(service): State<UploadService>,
    req: CompleteUpload,
) -> Result<Json<CompleteResponse>, AppError> {
    let artifact = service.complete(&req).await?;
    Ok(Json(CompleteResponse {
        message: "File merged successfully".into(),
        path: display_path(&artifact.path),
        url: media_url(&req.file_name),
        size_bytes: artifact.size_bytes,
        etag: artifact.etag,
    }))
}

/// `POST /upload` — whole file in one multipart request, stored under the
/// part's own file name.
pub async fn upload_file(
    State(service): State<UploadService>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    let mut multipart = multipart.map_err(|err| AppError::invalid_input(err.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::invalid_input(err.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let file_name = match field.file_name() {
            Some(raw) => FileName::parse(raw)?,
            None => return Err(AppError::invalid_input("file is nil")),
        };
        let stream = field.map(|res| res.map_err(io::Error::other));
        let artifact = service.store_file(&file_name, stream).await?;
        return Ok(Json(UploadResponse {
            message: format!("'{}' uploaded!", file_name),
            path: display_path(&artifact.path),
            url: media_url(&file_name),
        }));
    }

    Err(ValidationError::MissingFile.into())
}

/// `GET /media/{name}` — stream a completed file.
pub async fn download_file(
    State(service): State<UploadService>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let file_name = FileName::parse(&name)?;
    let (file, len) = service.open_artifact(&file_name).await?;

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    Ok(response)
}

fn media_url(file_name: &FileName) -> String {
    format!("/media/{}", urlencoding::encode(file_name.as_str()))
}

fn display_path(path: &FsPath) -> String {
    path.display().to_string()
}
