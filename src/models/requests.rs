//! Validated request types for each upload operation.
//!
//! Clients describe a request through `X-*` headers. Each operation decodes and
//! checks its headers exactly once, here, so the service layer only ever sees
//! well-formed session ids, chunk numbers and file names.

use axum::http::HeaderMap;
use std::fmt;
use thiserror::Error;

pub const FILE_ID_HEADER: &str = "x-file-id";
pub const FILE_NAME_HEADER: &str = "x-file-name";
pub const CHUNK_NUMBER_HEADER: &str = "x-chunk-number";
pub const TOTAL_CHUNKS_HEADER: &str = "x-total-chunks";

/// Upper bound for session ids and file names; both become file names on disk.
const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} header is required")]
    MissingHeader(&'static str),
    #[error("{header} header is invalid: {reason}")]
    InvalidHeader {
        header: &'static str,
        reason: String,
    },
    #[error("chunk number {chunk_number} exceeds total chunks {total_chunks}")]
    ChunkOutOfRange { chunk_number: u32, total_chunks: u32 },
    #[error("total chunks {total_chunks} exceeds the limit of {limit}")]
    TooManyChunks { total_chunks: u32, limit: u32 },
    #[error("multipart field `file` is required")]
    MissingFile,
    #[error("name `{name}` invalid: {reason}")]
    InvalidName { name: String, reason: &'static str },
}

/// Prefixes of the store's own scratch files (staged writes, readiness checks).
const RESERVED_PREFIXES: [&str; 2] = [".tmp-", ".readyz-"];

/// Reject names that could escape their directory or collide with staging files.
fn ensure_name_safe(name: &str) -> Result<(), ValidationError> {
    let invalid = |reason| ValidationError::InvalidName {
        name: name.to_string(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("must be at most 255 bytes"));
    }
    if name == "." || name == ".." {
        return Err(invalid("must not be `.` or `..`"));
    }
    if RESERVED_PREFIXES.iter().any(|prefix| name.starts_with(prefix)) {
        return Err(invalid("uses a reserved prefix"));
    }
    if name
        .chars()
        .any(|c| c.is_control() || c == '/' || c == '\\' || c == '\0')
    {
        return Err(invalid("must not contain path separators or control characters"));
    }
    Ok(())
}

/// Client-chosen identifier grouping the chunks of one upload.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        ensure_name_safe(raw)?;
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a merged artifact inside the completed area.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileName(String);

impl FileName {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        ensure_name_safe(raw)?;
        Ok(Self(raw.to_string()))
    }

    /// Decode a percent-encoded name (browsers send `encodeURIComponent(name)`).
    pub fn parse_encoded(raw: &str) -> Result<Self, ValidationError> {
        let decoded = urlencoding::decode(raw).map_err(|_| ValidationError::InvalidName {
            name: raw.to_string(),
            reason: "percent-encoding is not valid UTF-8",
        })?;
        Self::parse(&decoded)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, ValidationError> {
    let value = headers
        .get(name)
        .ok_or(ValidationError::MissingHeader(name))?
        .to_str()
        .map_err(|_| ValidationError::InvalidHeader {
            header: name,
            reason: "not visible ASCII".into(),
        })?
        .trim();
    if value.is_empty() {
        return Err(ValidationError::MissingHeader(name));
    }
    Ok(value)
}

fn positive_header(headers: &HeaderMap, name: &'static str) -> Result<u32, ValidationError> {
    let raw = header_str(headers, name)?;
    match raw.parse::<u32>() {
        Ok(0) => Err(ValidationError::InvalidHeader {
            header: name,
            reason: "must be greater than zero".into(),
        }),
        Ok(n) => Ok(n),
        Err(err) => Err(ValidationError::InvalidHeader {
            header: name,
            reason: err.to_string(),
        }),
    }
}

fn total_chunks_header(headers: &HeaderMap, limit: u32) -> Result<u32, ValidationError> {
    let total_chunks = positive_header(headers, TOTAL_CHUNKS_HEADER)?;
    if total_chunks > limit {
        return Err(ValidationError::TooManyChunks {
            total_chunks,
            limit,
        });
    }
    Ok(total_chunks)
}

fn session_header(headers: &HeaderMap) -> Result<SessionId, ValidationError> {
    SessionId::parse(header_str(headers, FILE_ID_HEADER)?)
}

/// Headers of `POST /upload/check`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkUpload {
    pub session_id: SessionId,
    pub chunk_number: u32,
    pub total_chunks: u32,
}

impl ChunkUpload {
    /// `max_total_chunks` bounds the declared `X-Total-Chunks`.
    pub fn from_headers(
        headers: &HeaderMap,
        max_total_chunks: u32,
    ) -> Result<Self, ValidationError> {
        let session_id = session_header(headers)?;
        let chunk_number = positive_header(headers, CHUNK_NUMBER_HEADER)?;
        let total_chunks = total_chunks_header(headers, max_total_chunks)?;
        if chunk_number > total_chunks {
            return Err(ValidationError::ChunkOutOfRange {
                chunk_number,
                total_chunks,
            });
        }
        Ok(Self {
            session_id,
            chunk_number,
            total_chunks,
        })
    }
}

/// Headers of `GET /upload/status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusQuery {
    pub session_id: SessionId,
}

impl StatusQuery {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ValidationError> {
        Ok(Self {
            session_id: session_header(headers)?,
        })
    }
}

/// Headers of `POST /upload/complete`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteUpload {
    pub session_id: SessionId,
    pub file_name: FileName,
    pub total_chunks: u32,
}

impl CompleteUpload {
    pub fn from_headers(
        headers: &HeaderMap,
        max_total_chunks: u32,
    ) -> Result<Self, ValidationError> {
        let session_id = session_header(headers)?;
        let file_name = FileName::parse_encoded(header_str(headers, FILE_NAME_HEADER)?)?;
        let total_chunks = total_chunks_header(headers, max_total_chunks)?;
        Ok(Self {
            session_id,
            file_name,
            total_chunks,
        })
    }
}
