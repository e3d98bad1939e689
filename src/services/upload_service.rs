//! src/services/upload_service.rs
//!
//! UploadService — the chunked upload workflow. Receiving a chunk writes its
//! blob and records the chunk number in the index; status reads the index;
//! completion validates the chunk set, merges blobs in ascending order and
//! only then cleans up. Nothing here holds locks: per-chunk writes are atomic
//! renames and membership updates are single index transactions.

use crate::{
    config::DEFAULT_MAX_TOTAL_CHUNKS,
    models::{
        requests::{ChunkUpload, CompleteUpload, FileName, SessionId, ValidationError},
        session::UploadSession,
    },
    services::{
        chunk_index::{ChunkIndex, IndexError},
        chunk_store::{ChunkStore, StoreError, StoredArtifact},
    },
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::{
    collections::{BTreeMap, BTreeSet},
    io,
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::fs::File;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    /// `missing` and `unexpected` hold at most [`MAX_LISTED_CHUNKS`] numbers
    /// each; the counts cover the whole difference.
    #[error(
        "not all chunks have been uploaded ({missing_count} missing, {unexpected_count} unexpected)"
    )]
    Incomplete {
        missing: Vec<u32>,
        missing_count: u32,
        unexpected: Vec<u32>,
        unexpected_count: usize,
    },
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type UploadResult<T> = Result<T, UploadError>;

/// Cap on chunk numbers listed in an incomplete-upload error.
pub const MAX_LISTED_CHUNKS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReceipt {
    pub chunk_number: u32,
    pub size_bytes: u64,
}

/// What status reports for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub uploaded: BTreeSet<u32>,
    /// `None` until the first chunk is registered.
    pub session: Option<UploadSession>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions: usize,
    pub chunks: usize,
    /// Chunk blobs with no index entry behind them.
    pub orphans: usize,
}

/// Entry point for every upload operation. Cheap to clone; handles to the
/// index and blob store are supplied by the caller.
#[derive(Clone)]
pub struct UploadService {
    pub index: Arc<dyn ChunkIndex>,
    pub store: ChunkStore,
    /// Largest chunk count a request may declare.
    pub max_total_chunks: u32,
}

impl UploadService {
    pub fn new(index: Arc<dyn ChunkIndex>, store: ChunkStore) -> Self {
        Self {
            index,
            store,
            max_total_chunks: DEFAULT_MAX_TOTAL_CHUNKS,
        }
    }

    pub fn with_max_total_chunks(mut self, max_total_chunks: u32) -> Self {
        self.max_total_chunks = max_total_chunks.max(1);
        self
    }

    /// Persist one chunk and mark it received.
    ///
    /// The blob is published before the index is touched, so a chunk number
    /// never appears in status without a complete blob behind it.
    pub async fn receive_chunk<S>(&self, req: &ChunkUpload, body: S) -> UploadResult<ChunkReceipt>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let size_bytes = self
            .store
            .write_chunk(&req.session_id, req.chunk_number, body)
            .await?;
        self.index
            .register_chunk(&req.session_id, req.chunk_number)
            .await?;

        debug!(
            session_id = %req.session_id,
            chunk = req.chunk_number,
            total = req.total_chunks,
            size_bytes,
            "chunk received"
        );
        Ok(ChunkReceipt {
            chunk_number: req.chunk_number,
            size_bytes,
        })
    }

    /// Chunk numbers received so far, plus the session record once one exists.
    /// Unknown sessions yield an empty set and no record.
    pub async fn session_status(&self, session_id: &SessionId) -> UploadResult<SessionStatus> {
        let uploaded = self.index.chunks(session_id).await?;
        let session = self.index.session(session_id).await?;
        Ok(SessionStatus { uploaded, session })
    }

    /// Merge a finished session into its artifact and discard the session.
    ///
    /// Refuses unless the received set is exactly `{1..=total_chunks}`. Cleanup
    /// runs only after the artifact is published; the index entry goes first so
    /// that a failure there leaves every blob in place for a retry.
    pub async fn complete(&self, req: &CompleteUpload) -> UploadResult<StoredArtifact> {
        let present = self.index.chunks(&req.session_id).await?;
        ensure_complete(&present, req.total_chunks)?;

        let artifact = self
            .store
            .merge(&req.session_id, req.total_chunks, &req.file_name)
            .await?;

        self.index.remove_session(&req.session_id).await?;
        let removed = self.store.remove_chunks(&req.session_id, present).await;
        if removed != req.total_chunks as usize {
            warn!(
                "session {}: removed {} of {} chunk blobs after merge",
                req.session_id, removed, req.total_chunks
            );
        }

        info!(
            session_id = %req.session_id,
            file = %req.file_name,
            chunks = req.total_chunks,
            size_bytes = artifact.size_bytes,
            "upload completed"
        );
        Ok(artifact)
    }

    /// Single-request upload straight into the completed area.
    pub async fn store_file<S>(&self, file_name: &FileName, body: S) -> UploadResult<StoredArtifact>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let artifact = self.store.write_artifact(file_name, body).await?;
        info!(
            file = %file_name,
            size_bytes = artifact.size_bytes,
            "file uploaded"
        );
        Ok(artifact)
    }

    pub async fn open_artifact(&self, file_name: &FileName) -> UploadResult<(File, u64)> {
        Ok(self.store.open_artifact(file_name).await?)
    }

    /// Drop every session idle since before `cutoff`, index entry and blobs.
    pub async fn expire_idle_sessions(&self, cutoff: DateTime<Utc>) -> UploadResult<SweepReport> {
        let mut report = SweepReport::default();
        for session in self.index.idle_sessions(cutoff).await? {
            let session_id = match SessionId::parse(&session.session_id) {
                Ok(id) => id,
                Err(err) => {
                    warn!("skipping unexpected session id in index: {}", err);
                    continue;
                }
            };
            let chunks = self.index.chunks(&session_id).await?;
            self.index.remove_session(&session_id).await?;
            report.chunks += self.store.remove_chunks(&session_id, chunks).await;
            report.sessions += 1;
            info!(
                session_id = %session_id,
                last_activity_at = %session.last_activity_at,
                "expired idle upload session"
            );
        }
        Ok(report)
    }

    /// Delete chunk blobs older than `max_age` that the index does not list.
    ///
    /// These are left behind when a re-upload lands while its session is being
    /// completed or expired: the blob is written, then the cleanup removes the
    /// index entry it was registered under.
    pub async fn reclaim_orphan_chunks(&self, max_age: Duration) -> UploadResult<usize> {
        let mut by_session: BTreeMap<SessionId, Vec<u32>> = BTreeMap::new();
        for (session_id, chunk_number) in self.store.chunks_older_than(max_age).await? {
            by_session.entry(session_id).or_default().push(chunk_number);
        }

        let mut removed = 0;
        for (session_id, blobs) in by_session {
            let registered = self.index.chunks(&session_id).await?;
            let orphans: Vec<u32> = blobs
                .into_iter()
                .filter(|n| !registered.contains(n))
                .collect();
            if orphans.is_empty() {
                continue;
            }
            let n = self.store.remove_chunks(&session_id, orphans).await;
            if n > 0 {
                info!(session_id = %session_id, blobs = n, "removed orphan chunk blobs");
            }
            removed += n;
        }
        Ok(removed)
    }
}

/// Exact set equality against `{1..=total_chunks}`.
///
/// The common case costs O(|present|). Only a failing check walks the range,
/// and it stops once [`MAX_LISTED_CHUNKS`] gaps have been listed.
fn ensure_complete(present: &BTreeSet<u32>, total_chunks: u32) -> UploadResult<()> {
    if present.len() == total_chunks as usize
        && present.first() == Some(&1)
        && present.last() == Some(&total_chunks)
    {
        return Ok(());
    }

    let in_range = present.range(1..).take_while(|n| **n <= total_chunks).count();
    let missing_count = total_chunks - in_range as u32;
    let unexpected_count = present.len() - in_range;
    let missing = (1..=total_chunks)
        .filter(|n| !present.contains(n))
        .take(MAX_LISTED_CHUNKS)
        .collect();
    let unexpected = present
        .iter()
        .copied()
        .filter(|n| *n == 0 || *n > total_chunks)
        .take(MAX_LISTED_CHUNKS)
        .collect();
    Err(UploadError::Incomplete {
        missing,
        missing_count,
        unexpected,
        unexpected_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_range_is_complete() {
        assert!(ensure_complete(&BTreeSet::from([1, 2, 3]), 3).is_ok());
    }

    #[test]
    fn matching_count_with_wrong_members_is_rejected() {
        let err = ensure_complete(&BTreeSet::from([1, 2, 4]), 3).unwrap_err();
        match err {
            UploadError::Incomplete {
                missing,
                missing_count,
                unexpected,
                unexpected_count,
            } => {
                assert_eq!(missing, vec![3]);
                assert_eq!(missing_count, 1);
                assert_eq!(unexpected, vec![4]);
                assert_eq!(unexpected_count, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_session_misses_everything() {
        let err = ensure_complete(&BTreeSet::new(), 2).unwrap_err();
        assert!(matches!(
            err,
            UploadError::Incomplete { ref missing, missing_count: 2, .. } if missing == &vec![1, 2]
        ));
    }

    #[test]
    fn huge_declared_total_lists_a_bounded_prefix() {
        let present = BTreeSet::from([2, 5]);
        let err = ensure_complete(&present, u32::MAX).unwrap_err();
        match err {
            UploadError::Incomplete {
                missing,
                missing_count,
                unexpected,
                unexpected_count,
            } => {
                assert_eq!(missing.len(), MAX_LISTED_CHUNKS);
                assert_eq!(&missing[..4], &[1, 3, 4, 6]);
                assert_eq!(missing_count, u32::MAX - 2);
                assert!(unexpected.is_empty());
                assert_eq!(unexpected_count, 0);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn many_out_of_range_chunks_are_capped() {
        let present: BTreeSet<u32> = (1..=500).collect();
        let err = ensure_complete(&present, 10).unwrap_err();
        assert!(matches!(
            err,
            UploadError::Incomplete {
                ref missing,
                missing_count: 0,
                ref unexpected,
                unexpected_count: 490,
            } if missing.is_empty()
                && unexpected.len() == MAX_LISTED_CHUNKS
                && unexpected[0] == 11
        ));
    }
}
