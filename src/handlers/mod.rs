pub mod download_handlers;
pub mod file_handlers;
pub mod health_handlers;
pub mod upload_handlers;

use crate::errors::AppError;
use crate::hash::is_valid_content_hash;

/// Validate and normalize an owner identifier.
pub(crate) fn check_owner(owner: &str) -> Result<&str, AppError> {
    if owner.is_empty() || owner.len() > 64 {
        return Err(AppError::invalid_params(
            "owner must be between 1 and 64 characters",
        ));
    }
    if !owner
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
    {
        return Err(AppError::invalid_params(
            "owner may only contain letters, digits, '.', '_' and '-'",
        ));
    }
    Ok(owner)
}

/// Validate a hex content hash, normalizing case.
pub(crate) fn check_content_hash(hash: &str) -> Result<String, AppError> {
    let normalized = hash.to_ascii_lowercase();
    if !is_valid_content_hash(&normalized) {
        return Err(AppError::invalid_params(
            "content hash must be 40 hexadecimal characters",
        ));
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_validation() {
        assert!(check_owner("alice").is_ok());
        assert!(check_owner("team-1.backup_node").is_ok());
        assert!(check_owner("").is_err());
        assert!(check_owner("a/b").is_err());
        assert!(check_owner(&"x".repeat(65)).is_err());
    }

    #[test]
    fn content_hash_is_normalized() {
        let upper = "A9993E364706816ABA3E25717850C26C9CD0D89D";
        assert_eq!(
            check_content_hash(upper).unwrap(),
            upper.to_ascii_lowercase()
        );
        assert!(check_content_hash("short").is_err());
        assert!(check_content_hash(&"g".repeat(40)).is_err());
    }
}
