//! Resumable chunked file uploads over HTTP.
//!
//! Clients split a file into numbered chunks, upload them in any order (with
//! retries), poll which ones have arrived, and finally ask the server to merge
//! them into one file. Chunk membership lives in a SQLite index, chunk payloads
//! and merged files on local disk.

use anyhow::{Context, Result};
use axum::Router;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{str::FromStr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

use config::AppConfig;
use services::{
    chunk_index::SqliteChunkIndex, chunk_store::ChunkStore, upload_service::UploadService,
};

/// Open the SQLite chunk index, creating the database file and its parent
/// directory when missing.
pub async fn connect_index(database_url: &str) -> Result<SqliteChunkIndex> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("parsing database url `{}`", database_url))?
        .create_if_missing(true);

    let db_path = options.get_filename();
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let pool: SqlitePool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to chunk index at {}", database_url))?;

    Ok(SqliteChunkIndex::new(Arc::new(pool)))
}

/// Wire the index and blob store described by `cfg` into an [`UploadService`].
///
/// Fails if the index is unreachable or its schema cannot be applied.
pub async fn build_service(cfg: &AppConfig) -> Result<UploadService> {
    let index = connect_index(&cfg.database_url).await?;
    index.migrate().await.context("applying chunk index schema")?;

    let store = ChunkStore::open(cfg.chunk_dir(), cfg.completed_dir(), cfg.merge_buffer_bytes)
        .await
        .with_context(|| format!("preparing storage under {}", cfg.storage_dir.display()))?;

    Ok(UploadService::new(Arc::new(index), store).with_max_total_chunks(cfg.max_total_chunks))
}

/// Full application router: routes, CORS, request tracing, shared state.
pub fn app(service: UploadService, cfg: &AppConfig) -> Router {
    routes::routes::routes(cfg.max_chunk_bytes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}
