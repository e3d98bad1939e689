//! Represents an upload session — the grouping of all chunks of one logical file.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// An upload session as recorded in the chunk index.
///
/// Sessions are created by the first chunk registered under their id and
/// destroyed by a successful completion or by the idle-session sweeper.
/// Reported as-is by the status endpoint.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadSession {
    /// Client-chosen opaque identifier (the `X-File-Id` header).
    pub session_id: String,

    /// When the first chunk of this session was registered.
    pub created_at: DateTime<Utc>,

    /// When a chunk was last registered; drives expiry.
    pub last_activity_at: DateTime<Utc>,
}

