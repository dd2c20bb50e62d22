//! Per-owner file associations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Associates an owner with stored content under a user-visible name.
///
/// The record never duplicates size or location; it points at the
/// `FileRecord` by content hash. Deletes tombstone the row (`is_deleted`)
/// so a later upload of the same content restores it.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct UserFileRecord {
    /// Internal id for DB indexing.
    pub id: String,

    /// Owning identity.
    pub owner: String,

    /// Content hash this record points at.
    pub content_hash: String,

    /// User-visible file name, independent of the content identity.
    pub file_name: String,

    /// When the owner last uploaded (or fast-uploaded) this content.
    pub uploaded_at: DateTime<Utc>,

    /// Best-effort download counter.
    pub download_count: i64,

    /// Tombstone flag; soft-deleted rows are kept for restore.
    pub is_deleted: bool,
}
