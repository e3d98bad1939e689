use crate::{
    models::requests::ValidationError,
    services::{chunk_store::StoreError, upload_service::UploadError},
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use std::fmt;

/// Closed set of failure categories a client can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or malformed headers, missing `file` field, unsafe names.
    InvalidInput,
    /// The declared chunk set has not fully arrived yet.
    IncompleteUpload,
    NotFound,
    /// The chunk index could not be reached.
    DependencyUnavailable,
    /// Blob or artifact I/O failed.
    Io,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::InvalidInput | ErrorKind::IncompleteUpload => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::DependencyUnavailable | ErrorKind::Io => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::IncompleteUpload => "incomplete_upload",
            ErrorKind::NotFound => "not_found",
            ErrorKind::DependencyUnavailable => "dependency_unavailable",
            ErrorKind::Io => "io_failure",
        }
    }
}

/// Error returned from every handler; renders as `{error, code, status}` JSON.
#[derive(Debug)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    /// Extra fields merged into the JSON body (e.g. missing chunk numbers).
    pub details: Option<Value>,
}

impl AppError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            details: None,
        }
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, msg)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = json!({
            "error": self.message,
            "code": self.kind.as_str(),
            "status": status.as_u16()
        });
        if let (Some(Value::Object(extra)), Some(map)) = (self.details, body.as_object_mut()) {
            map.extend(extra);
        }

        (status, Json(body)).into_response()
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::invalid_input(err.to_string())
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        let message = err.to_string();
        match err {
            UploadError::Invalid(inner) => inner.into(),
            UploadError::Incomplete {
                missing,
                missing_count,
                unexpected,
                unexpected_count,
            } => {
                let details = json!({
                    "missing": missing,
                    "missing_count": missing_count,
                    "unexpected": unexpected,
                    "unexpected_count": unexpected_count
                });
                AppError::new(ErrorKind::IncompleteUpload, message).with_details(details)
            }
            UploadError::Index(inner) => {
                tracing::error!("chunk index failure: {}", inner);
                AppError::new(ErrorKind::DependencyUnavailable, "chunk index unavailable")
            }
            UploadError::Store(StoreError::ArtifactNotFound(name)) => {
                AppError::not_found(format!("file `{}` not found", name))
            }
            UploadError::Store(inner) => {
                tracing::error!("blob store failure: {}", inner);
                AppError::new(ErrorKind::Io, message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_fixed_statuses() {
        assert_eq!(ErrorKind::InvalidInput.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::IncompleteUpload.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorKind::DependencyUnavailable.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ErrorKind::Io.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn incomplete_upload_lists_missing_chunks() {
        let err: AppError = UploadError::Incomplete {
            missing: vec![3],
            missing_count: 1,
            unexpected: vec![],
            unexpected_count: 0,
        }
        .into();
        assert_eq!(err.kind, ErrorKind::IncompleteUpload);
        assert_eq!(
            err.details,
            Some(json!({
                "missing": [3],
                "missing_count": 1,
                "unexpected": [],
                "unexpected_count": 0
            }))
        );
    }
}
