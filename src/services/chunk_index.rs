//! Chunk index — the membership store recording which chunk numbers have
//! arrived for each upload session.
//!
//! The trait is the seam handed to the upload service; `SqliteChunkIndex` is
//! the production implementation. Membership is a set: registering a chunk
//! number twice leaves the set unchanged.

use crate::models::{requests::SessionId, session::UploadSession};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use std::{collections::BTreeSet, sync::Arc};
use thiserror::Error;

/// Schema applied by [`SqliteChunkIndex::migrate`] and by `--migrate`.
pub const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
#[error("chunk index error: {source}")]
pub struct IndexError {
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl IndexError {
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            source: Box::new(error),
        }
    }
}

impl From<sqlx::Error> for IndexError {
    fn from(err: sqlx::Error) -> Self {
        Self::backend(err)
    }
}

pub type IndexResult<T> = Result<T, IndexError>;

#[async_trait]
pub trait ChunkIndex: Send + Sync {
    /// Add `chunk_number` to the session's set, creating the session on first use
    /// and refreshing its activity timestamp.
    async fn register_chunk(&self, session_id: &SessionId, chunk_number: u32) -> IndexResult<()>;

    /// Current membership set; empty for an unknown session.
    async fn chunks(&self, session_id: &SessionId) -> IndexResult<BTreeSet<u32>>;

    async fn session(&self, session_id: &SessionId) -> IndexResult<Option<UploadSession>>;

    /// Drop the session record and its membership set. Removing an unknown
    /// session is not an error.
    async fn remove_session(&self, session_id: &SessionId) -> IndexResult<()>;

    /// Sessions whose last chunk arrived before `cutoff`.
    async fn idle_sessions(&self, cutoff: DateTime<Utc>) -> IndexResult<Vec<UploadSession>>;

    /// Cheap round-trip used by readiness checks.
    async fn ping(&self) -> IndexResult<()>;
}

#[derive(FromRow)]
struct SessionRow {
    session_id: String,
    created_at: i64,
    last_activity_at: i64,
}

impl From<SessionRow> for UploadSession {
    fn from(row: SessionRow) -> Self {
        Self {
            session_id: row.session_id,
            created_at: from_millis(row.created_at),
            last_activity_at: from_millis(row.last_activity_at),
        }
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// SQLite-backed chunk index. Cheap to clone.
#[derive(Clone)]
pub struct SqliteChunkIndex {
    pub db: Arc<SqlitePool>,
}

impl SqliteChunkIndex {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn migrate(&self) -> IndexResult<()> {
        let statements = MIGRATION_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty() && !s.lines().all(|l| l.trim_start().starts_with("--")));

        for stmt in statements {
            tracing::debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ChunkIndex for SqliteChunkIndex {
    async fn register_chunk(&self, session_id: &SessionId, chunk_number: u32) -> IndexResult<()> {
        let now = Utc::now().timestamp_millis();
        let mut tx = self.db.begin().await?;

        sqlx::query(
            "INSERT INTO upload_sessions (session_id, created_at, last_activity_at)
             VALUES (?, ?, ?)
             ON CONFLICT(session_id) DO UPDATE SET last_activity_at = excluded.last_activity_at",
        )
        .bind(session_id.as_str())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO upload_chunks (session_id, chunk_number, received_at)
             VALUES (?, ?, ?)
             ON CONFLICT(session_id, chunk_number) DO UPDATE SET received_at = excluded.received_at",
        )
        .bind(session_id.as_str())
        .bind(i64::from(chunk_number))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn chunks(&self, session_id: &SessionId) -> IndexResult<BTreeSet<u32>> {
        let rows: Vec<i64> = sqlx::query_scalar(
            "SELECT chunk_number FROM upload_chunks WHERE session_id = ? ORDER BY chunk_number",
        )
        .bind(session_id.as_str())
        .fetch_all(&*self.db)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|n| u32::try_from(n).ok())
            .collect())
    }

    async fn session(&self, session_id: &SessionId) -> IndexResult<Option<UploadSession>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT session_id, created_at, last_activity_at
             FROM upload_sessions WHERE session_id = ?",
        )
        .bind(session_id.as_str())
        .fetch_optional(&*self.db)
        .await?;

        Ok(row.map(UploadSession::from))
    }

    async fn remove_session(&self, session_id: &SessionId) -> IndexResult<()> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM upload_chunks WHERE session_id = ?")
            .bind(session_id.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM upload_sessions WHERE session_id = ?")
            .bind(session_id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn idle_sessions(&self, cutoff: DateTime<Utc>) -> IndexResult<Vec<UploadSession>> {
        let rows = sqlx::query_as::<_, SessionRow>(
            "SELECT session_id, created_at, last_activity_at
             FROM upload_sessions WHERE last_activity_at < ?
             ORDER BY last_activity_at",
        )
        .bind(cutoff.timestamp_millis())
        .fetch_all(&*self.db)
        .await?;

        Ok(rows.into_iter().map(UploadSession::from).collect())
    }

    async fn ping(&self) -> IndexResult<()> {
        let v = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        if v != 1 {
            return Err(IndexError::backend(std::io::Error::other(format!(
                "unexpected result: {}",
                v
            ))));
        }
        Ok(())
    }
}
