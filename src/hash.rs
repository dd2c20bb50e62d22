//! SHA-1 content fingerprinting.
//!
//! The content hash is the primary identity of stored bytes: dedup,
//! tier keys, and download lookups all go through it.

use sha1::{Digest, Sha1};

/// Incremental hasher for computing a content hash while streaming bytes
/// to disk, so no second read pass is needed.
#[derive(Default)]
pub struct ContentHasher {
    inner: Sha1,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    /// Finish and return the lowercase hex digest.
    pub fn finalize_hex(self) -> String {
        hex::encode(self.inner.finalize())
    }
}

/// Hash a full in-memory buffer. Convenience for small inputs and tests.
pub fn sha1_hex(bytes: &[u8]) -> String {
    hex::encode(Sha1::digest(bytes))
}

/// Whether `s` looks like a SHA-1 hex digest (40 hex characters).
///
/// Content hashes double as tier keys and scratch file names, so this check
/// also keeps request-supplied hashes path-safe.
pub fn is_valid_content_hash(s: &str) -> bool {
    s.len() == 40 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digests() {
        assert_eq!(sha1_hex(b"abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(sha1_hex(b""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn streaming_matches_one_shot() {
        let mut hasher = ContentHasher::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finalize_hex(), sha1_hex(b"hello world"));
    }

    #[test]
    fn hash_validation() {
        assert!(is_valid_content_hash(&"a".repeat(40)));
        assert!(is_valid_content_hash(&"A0".repeat(20)));
        assert!(!is_valid_content_hash(&"a".repeat(39)));
        assert!(!is_valid_content_hash(&"g".repeat(40)));
        assert!(!is_valid_content_hash("../../../../etc/passwd"));
    }
}
