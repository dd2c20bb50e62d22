//! Content-addressed file records and the storage-tier enum.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// The storage tier currently holding an object's bytes.
///
/// Every code path that needs to know where bytes live (download, delete,
/// transfer) switches on this enum; locations are tier-relative keys and
/// never encode the tier themselves.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TierKind {
    /// Fast local disk; landing zone for fresh uploads.
    Local,
    /// Durable, slower object store for important content.
    Cold,
    /// Cheap bulk object store for everything else.
    Bulk,
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierKind::Local => write!(f, "local"),
            TierKind::Cold => write!(f, "cold"),
            TierKind::Bulk => write!(f, "bulk"),
        }
    }
}

/// One row per unique content hash.
///
/// The (`tier`, `location`) pair is the single source of truth for where the
/// bytes are; user-facing records only point at this row by hash.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct FileRecord {
    /// SHA-1 of the full file bytes, lowercase hex. Primary key.
    pub content_hash: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Tier currently holding the canonical copy.
    pub tier: TierKind,

    /// Tier-relative object key.
    pub location: String,

    /// When the content was first stored.
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    /// Build a record for freshly stored content.
    pub fn new(content_hash: impl Into<String>, size_bytes: u64, tier: TierKind, location: impl Into<String>) -> Self {
        Self {
            content_hash: content_hash.into(),
            size_bytes: size_bytes as i64,
            tier,
            location: location.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_kind_display_matches_serde() {
        for (kind, text) in [
            (TierKind::Local, "local"),
            (TierKind::Cold, "cold"),
            (TierKind::Bulk, "bulk"),
        ] {
            assert_eq!(kind.to_string(), text);
            assert_eq!(serde_json::to_string(&kind).unwrap(), format!("\"{text}\""));
        }
    }
}
