//! Content addressing for artifact bytes.

use sha2::{Digest, Sha256};

use crate::domain::errors::{DomainError, DomainResult};

/// Hex SHA-256 of artifact bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Reject anything that is not a lowercase hex SHA-256 digest.
pub fn validate_hash(content_hash: &str) -> DomainResult<()> {
    let valid = content_hash.len() == 64
        && content_hash
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
    if valid {
        Ok(())
    } else {
        Err(DomainError::ValidationFailed(format!(
            "invalid content hash '{content_hash}'"
        )))
    }
}
