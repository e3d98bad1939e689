//! Request extractors: each operation's headers are decoded into its
//! validated request type before the handler body runs.

use crate::{
    errors::AppError,
    models::requests::{ChunkUpload, CompleteUpload, StatusQuery},
    services::upload_service::UploadService,
};
use axum::{extract::FromRequestParts, http::request::Parts};

impl FromRequestParts<UploadService> for ChunkUpload {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        service: &UploadService,
    ) -> Result<Self, Self::Rejection> {
        Ok(ChunkUpload::from_headers(
            &parts.headers,
            service.max_total_chunks,
        )?)
    }
}

impl<S> FromRequestParts<S> for StatusQuery
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(StatusQuery::from_headers(&parts.headers)?)
    }
}

impl FromRequestParts<UploadService> for CompleteUpload {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        service: &UploadService,
    ) -> Result<Self, Self::Rejection> {
        Ok(CompleteUpload::from_headers(
            &parts.headers,
            service.max_total_chunks,
        )?)
    }
}
