//! Chunk blob store — chunk payloads on local disk plus the completed-artifact area.
//!
//! Layout beneath the storage root:
//! - `chunks/{session}_{n}.chunk` one blob per received chunk
//! - `completed/{file name}` merged (or single-shot) artifacts
//!
//! Every write goes to a `.tmp-{uuid}` file in the destination directory and
//! is renamed into place only after the full body has been written and
//! synced, so readers never observe a truncated blob and racing writers of the
//! same slot resolve to whichever rename lands last.

use crate::models::requests::{FileName, SessionId};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::{debug, warn};
use uuid::Uuid;

const TMP_PREFIX: &str = ".tmp-";
const CHUNK_SUFFIX: &str = ".chunk";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("chunk {chunk_number} of session `{session_id}` is missing")]
    MissingChunk {
        session_id: String,
        chunk_number: u32,
    },
    #[error("file `{0}` not found")]
    ArtifactNotFound(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A file published into the completed area.
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Hex MD5 of the published bytes.
    pub etag: String,
}

#[derive(Clone, Debug)]
pub struct ChunkStore {
    chunk_dir: PathBuf,
    completed_dir: PathBuf,
    merge_buffer: usize,
}

impl ChunkStore {
    /// Open (and create if needed) the chunk and completed directories.
    pub async fn open(
        chunk_dir: impl Into<PathBuf>,
        completed_dir: impl Into<PathBuf>,
        merge_buffer: usize,
    ) -> StoreResult<Self> {
        let store = Self {
            chunk_dir: chunk_dir.into(),
            completed_dir: completed_dir.into(),
            merge_buffer: merge_buffer.max(1),
        };
        fs::create_dir_all(&store.chunk_dir).await?;
        fs::create_dir_all(&store.completed_dir).await?;
        Ok(store)
    }

    pub fn chunk_dir(&self) -> &Path {
        &self.chunk_dir
    }

    pub fn chunk_path(&self, session_id: &SessionId, chunk_number: u32) -> PathBuf {
        self.chunk_dir
            .join(format!("{}_{}{}", session_id.as_str(), chunk_number, CHUNK_SUFFIX))
    }

    pub fn artifact_path(&self, file_name: &FileName) -> PathBuf {
        self.completed_dir.join(file_name.as_str())
    }

    /// Store one chunk, replacing any earlier blob in the same slot.
    /// Returns the number of bytes written.
    pub async fn write_chunk<S>(
        &self,
        session_id: &SessionId,
        chunk_number: u32,
        stream: S,
    ) -> StoreResult<u64>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let dest = self.chunk_path(session_id, chunk_number);
        let (size_bytes, _) = write_atomic(&self.chunk_dir, &dest, stream).await?;
        Ok(size_bytes)
    }

    /// Stream a whole file straight into the completed area.
    pub async fn write_artifact<S>(
        &self,
        file_name: &FileName,
        stream: S,
    ) -> StoreResult<StoredArtifact>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let path = self.artifact_path(file_name);
        let (size_bytes, etag) = write_atomic(&self.completed_dir, &path, stream).await?;
        Ok(StoredArtifact {
            path,
            size_bytes,
            etag,
        })
    }

    /// Concatenate chunks `1..=total_chunks` in ascending order into `file_name`.
    ///
    /// The artifact is staged and renamed into place only once every chunk has
    /// been copied. On failure nothing is deleted: the chunks stay put and a
    /// later call can merge again.
    pub async fn merge(
        &self,
        session_id: &SessionId,
        total_chunks: u32,
        file_name: &FileName,
    ) -> StoreResult<StoredArtifact> {
        let path = self.artifact_path(file_name);
        let tmp_path = self.completed_dir.join(format!("{}{}", TMP_PREFIX, Uuid::new_v4()));
        let mut out = File::create(&tmp_path).await?;

        let (size_bytes, etag) = match self.copy_chunks(session_id, total_chunks, &mut out).await {
            Ok(done) => done,
            Err(err) => {
                drop(out);
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        };
        drop(out);

        publish(&tmp_path, &path).await?;
        Ok(StoredArtifact {
            path,
            size_bytes,
            etag,
        })
    }

    async fn copy_chunks(
        &self,
        session_id: &SessionId,
        total_chunks: u32,
        out: &mut File,
    ) -> StoreResult<(u64, String)> {
        let mut buf = vec![0u8; self.merge_buffer];
        let mut digest = Context::new();
        let mut size_bytes: u64 = 0;

        for chunk_number in 1..=total_chunks {
            let chunk_path = self.chunk_path(session_id, chunk_number);
            let mut chunk = File::open(&chunk_path).await.map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    StoreError::MissingChunk {
                        session_id: session_id.to_string(),
                        chunk_number,
                    }
                } else {
                    StoreError::Io(err)
                }
            })?;

            loop {
                let n = chunk.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                digest.consume(&buf[..n]);
                out.write_all(&buf[..n]).await?;
                size_bytes += n as u64;
            }
        }

        out.flush().await?;
        out.sync_all().await?;
        Ok((size_bytes, format!("{:x}", digest.compute())))
    }

    /// Delete the given chunk blobs of a session. Missing blobs are skipped and
    /// other failures are logged; returns how many blobs were removed.
    pub async fn remove_chunks<I>(&self, session_id: &SessionId, chunk_numbers: I) -> usize
    where
        I: IntoIterator<Item = u32>,
    {
        let mut removed = 0;
        for chunk_number in chunk_numbers {
            let path = self.chunk_path(session_id, chunk_number);
            match fs::remove_file(&path).await {
                Ok(_) => removed += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!("chunk {} already missing", path.display());
                }
                Err(err) => warn!("failed to remove chunk {}: {}", path.display(), err),
            }
        }
        removed
    }

    /// Open a completed artifact for streaming, with its length.
    pub async fn open_artifact(&self, file_name: &FileName) -> StoreResult<(File, u64)> {
        let path = self.artifact_path(file_name);
        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::ArtifactNotFound(file_name.to_string())
            } else {
                StoreError::Io(err)
            }
        })?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    /// Chunk blobs last written at least `max_age` ago, as `(session, number)`.
    /// Files whose name does not parse back into a chunk slot are skipped.
    pub async fn chunks_older_than(
        &self,
        max_age: Duration,
    ) -> StoreResult<Vec<(SessionId, u32)>> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut found = Vec::new();
        let mut entries = fs::read_dir(&self.chunk_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(slot) = parse_chunk_file_name(&file_name.to_string_lossy()) else {
                continue;
            };
            let modified = match entry.metadata().await {
                Ok(meta) => meta.modified()?,
                // Renamed over or removed since the listing.
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            if modified <= cutoff {
                found.push(slot);
            }
        }
        Ok(found)
    }

    /// Remove staging files left behind by writers that died mid-upload.
    pub async fn remove_stale_temp_files(&self, max_age: Duration) -> StoreResult<usize> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;
        for dir in [&self.chunk_dir, &self.completed_dir] {
            let mut entries = fs::read_dir(dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_name().to_string_lossy().starts_with(TMP_PREFIX) {
                    continue;
                }
                let modified = entry.metadata().await?.modified()?;
                if modified <= cutoff {
                    match fs::remove_file(entry.path()).await {
                        Ok(_) => removed += 1,
                        Err(err) if err.kind() == ErrorKind::NotFound => {}
                        Err(err) => warn!(
                            "failed to remove stale temp file {}: {}",
                            entry.path().display(),
                            err
                        ),
                    }
                }
            }
        }
        Ok(removed)
    }
}

/// Inverse of [`ChunkStore::chunk_path`]. Session ids may contain `_`, the
/// chunk number is whatever follows the last one.
fn parse_chunk_file_name(file_name: &str) -> Option<(SessionId, u32)> {
    let stem = file_name.strip_suffix(CHUNK_SUFFIX)?;
    let (session, number) = stem.rsplit_once('_')?;
    let chunk_number = number.parse::<u32>().ok().filter(|n| *n > 0)?;
    let session_id = SessionId::parse(session).ok()?;
    Some((session_id, chunk_number))
}

/// Write `stream` into a fresh temp file in `dir`, sync it, then rename onto `dest`.
/// Returns the byte count and hex MD5 of what was written.
async fn write_atomic<S>(dir: &Path, dest: &Path, stream: S) -> StoreResult<(u64, String)>
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    let tmp_path = dir.join(format!("{}{}", TMP_PREFIX, Uuid::new_v4()));
    let mut file = File::create(&tmp_path).await?;

    let mut size_bytes: u64 = 0;
    let mut digest = Context::new();
    pin_mut!(stream);
    while let Some(chunk_res) = stream.next().await {
        let chunk = match chunk_res {
            Ok(chunk) => chunk,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        };
        size_bytes += chunk.len() as u64;
        digest.consume(&chunk);
        if let Err(err) = file.write_all(&chunk).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
    }
    if let Err(err) = file.flush().await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(StoreError::Io(err));
    }
    if let Err(err) = file.sync_all().await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(StoreError::Io(err));
    }
    drop(file);

    publish(&tmp_path, dest).await?;
    Ok((size_bytes, format!("{:x}", digest.compute())))
}

/// Atomically move a fully written temp file onto its final path.
async fn publish(tmp_path: &Path, dest: &Path) -> StoreResult<()> {
    if let Err(err) = fs::rename(tmp_path, dest).await {
        if err.kind() == ErrorKind::AlreadyExists {
            fs::remove_file(dest).await?;
            fs::rename(tmp_path, dest).await?;
        } else {
            let _ = fs::remove_file(tmp_path).await;
            return Err(StoreError::Io(err));
        }
    }
    Ok(())
}
