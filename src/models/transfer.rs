//! Deferred cross-tier transfer jobs.

use crate::models::file::TierKind;
use serde::{Deserialize, Serialize};

/// A unit of deferred work instructing the transfer worker to move one
/// object between tiers.
///
/// Jobs have no durable storage of their own; their only lasting trace is
/// the file-record location update they cause.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferJob {
    /// Content hash of the object to move.
    pub content_hash: String,

    /// Tier currently holding the bytes.
    pub source_tier: TierKind,

    /// Key within the source tier.
    pub source_location: String,

    /// Tier the bytes should move to.
    pub dest_tier: TierKind,

    /// Key within the destination tier.
    pub dest_location: String,

    /// Delivery attempts so far; drives bounded retry.
    #[serde(default)]
    pub attempts: u32,
}

impl TransferJob {
    pub fn new(
        content_hash: impl Into<String>,
        source_tier: TierKind,
        source_location: impl Into<String>,
        dest_tier: TierKind,
        dest_location: impl Into<String>,
    ) -> Self {
        Self {
            content_hash: content_hash.into(),
            source_tier,
            source_location: source_location.into(),
            dest_tier,
            dest_location: dest_location.into(),
            attempts: 0,
        }
    }

    /// Copy of this job with the attempt counter bumped, for requeueing.
    pub fn retry(&self) -> Self {
        Self {
            attempts: self.attempts + 1,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_payload_roundtrip() {
        let job = TransferJob::new("abc123", TierKind::Local, "abc123", TierKind::Bulk, "abc123");
        let payload = serde_json::to_string(&job).unwrap();
        let parsed: TransferJob = serde_json::from_str(&payload).unwrap();
        assert_eq!(job, parsed);
        assert_eq!(parsed.attempts, 0);
        assert_eq!(job.retry().attempts, 1);
    }
}
