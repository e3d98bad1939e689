//! Shared helpers for driving the router in-process.
//! Note: #[allow(dead_code)] because each test file compiles common/ separately.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use chunked_upload::{
    app, build_service, config::AppConfig, models::requests::SessionId,
    services::upload_service::UploadService,
};
use serde_json::Value;
use std::path::PathBuf;
use tempfile::TempDir;
use tower::ServiceExt;

pub const BOUNDARY: &str = "chunked-upload-test-boundary";

#[allow(dead_code)]
pub struct TestServer {
    pub router: Router,
    pub service: UploadService,
    pub config: AppConfig,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Server backed by a fresh storage directory and SQLite file.
    pub async fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let storage = temp_dir.path().join("uploads");
        let db_url = format!("sqlite://{}", temp_dir.path().join("index.db").display());
        let config = AppConfig::with_storage(&storage, db_url);

        let service = build_service(&config)
            .await
            .expect("Failed to build upload service");
        let router = app(service.clone(), &config);

        Self {
            router,
            service,
            config,
            _temp_dir: temp_dir,
        }
    }

    pub fn chunk_path(&self, session: &str, chunk_number: u32) -> PathBuf {
        self.service
            .store
            .chunk_path(&SessionId::parse(session).unwrap(), chunk_number)
    }

    pub fn completed_path(&self, name: &str) -> PathBuf {
        self.config.completed_dir().join(name)
    }

    pub async fn upload_chunk(
        &self,
        session: &str,
        chunk_number: u32,
        total_chunks: u32,
        data: &[u8],
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/upload/check")
            .header("X-File-Id", session)
            .header("X-Chunk-Number", chunk_number.to_string())
            .header("X-Total-Chunks", total_chunks.to_string())
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body("file", "blob", data)))
            .unwrap();
        send(&self.router, request).await
    }

    pub async fn status(&self, session: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("GET")
            .uri("/upload/status")
            .header("X-File-Id", session)
            .body(Body::empty())
            .unwrap();
        send(&self.router, request).await
    }

    pub async fn complete(&self, session: &str, name: &str, total_chunks: u32) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/upload/complete")
            .header("X-File-Id", session)
            .header("X-File-Name", name)
            .header("X-Total-Chunks", total_chunks.to_string())
            .body(Body::empty())
            .unwrap();
        send(&self.router, request).await
    }

    /// Chunk numbers reported by `/upload/status`.
    pub async fn uploaded(&self, session: &str) -> Vec<u64> {
        let (status, body) = self.status(session).await;
        assert_eq!(status, StatusCode::OK, "status failed: {body}");
        body["uploaded"]
            .as_array()
            .expect("uploaded array")
            .iter()
            .map(|v| v.as_u64().expect("chunk number"))
            .collect()
    }
}

/// `multipart/form-data` body with a single file part.
pub fn multipart_body(field: &str, file_name: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

/// Run one request through the router and decode the JSON body (Null if empty or not JSON).
pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json: Value = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
    };

    (status, json)
}

/// Raw body bytes of a response.
#[allow(dead_code)]
pub async fn send_raw(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body_bytes.to_vec())
}
