//! Chunked-upload session state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// An in-progress chunked upload.
///
/// Owned exclusively by the upload subsystem; file records never reference
/// sessions. The session id embeds the owner for debuggability but relies on
/// a UUID for uniqueness.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadSession {
    /// Unique session identifier.
    pub id: String,

    /// Owner that initiated the upload.
    pub owner: String,

    /// Expected SHA-1 of the final assembled bytes.
    pub content_hash: String,

    /// Declared total size in bytes.
    pub declared_size: u64,

    /// Fixed chunk size for this session.
    pub chunk_size: u64,
}

impl UploadSession {
    /// Create a session with a freshly generated id.
    pub fn new(owner: &str, content_hash: &str, declared_size: u64, chunk_size: u64) -> Self {
        Self {
            id: format!("{}-{}", owner, Uuid::new_v4().simple()),
            owner: owner.to_string(),
            content_hash: content_hash.to_string(),
            declared_size,
            chunk_size,
        }
    }

    /// Number of chunks the client must upload.
    pub fn chunk_count(&self) -> u32 {
        self.declared_size.div_ceil(self.chunk_size) as u32
    }
}

/// Snapshot of a session as stored in the session store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadStatus {
    pub content_hash: String,
    pub declared_size: u64,
    pub chunk_size: u64,
    pub chunk_count: u32,
    /// Indices of chunks received so far.
    pub completed: BTreeSet<u32>,
}

impl UploadStatus {
    pub fn received_count(&self) -> u32 {
        self.completed.len() as u32
    }

    /// A session is complete once every chunk index has been marked.
    pub fn is_complete(&self) -> bool {
        self.received_count() == self.chunk_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_count_rounds_up() {
        let five_mib = 5 * 1024 * 1024;
        let session = UploadSession::new("alice", "0".repeat(40).as_str(), 12_000_000, five_mib);
        assert_eq!(session.chunk_count(), 3);

        let session = UploadSession::new("alice", "", 2 * five_mib, five_mib);
        assert_eq!(session.chunk_count(), 2);

        let session = UploadSession::new("alice", "", 0, five_mib);
        assert_eq!(session.chunk_count(), 0);
    }

    #[test]
    fn session_ids_are_unique_per_owner() {
        let a = UploadSession::new("bob", "", 1, 1);
        let b = UploadSession::new("bob", "", 1, 1);
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("bob-"));
    }

    #[test]
    fn status_completeness() {
        let mut status = UploadStatus {
            content_hash: String::new(),
            declared_size: 10,
            chunk_size: 5,
            chunk_count: 2,
            completed: BTreeSet::new(),
        };
        assert!(!status.is_complete());
        status.completed.insert(0);
        status.completed.insert(0);
        assert_eq!(status.received_count(), 1);
        status.completed.insert(1);
        assert!(status.is_complete());
    }
}
