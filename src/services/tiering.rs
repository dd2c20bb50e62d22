//! Tiering policy: classify finished uploads and pick their home tier.

use crate::models::file::TierKind;

/// How the policy values a file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageClass {
    /// Kept on the durable cold tier, moved synchronously.
    Important,
    /// Moved to the bulk tier, eagerly or via the transfer queue.
    Ordinary,
}

/// Filename-suffix classifier.
///
/// Deliberately simple and replaceable; the rest of the pipeline only sees
/// [`StorageClass`] and the target [`TierKind`].
#[derive(Clone, Debug)]
pub struct TieringPolicy {
    important_suffix: String,
}

impl TieringPolicy {
    pub fn new(important_suffix: impl Into<String>) -> Self {
        Self {
            important_suffix: important_suffix.into(),
        }
    }

    pub fn classify(&self, file_name: &str) -> StorageClass {
        if !self.important_suffix.is_empty() && file_name.ends_with(&self.important_suffix) {
            StorageClass::Important
        } else {
            StorageClass::Ordinary
        }
    }

    pub fn target_tier(&self, class: StorageClass) -> TierKind {
        match class {
            StorageClass::Important => TierKind::Cold,
            StorageClass::Ordinary => TierKind::Bulk,
        }
    }
}
