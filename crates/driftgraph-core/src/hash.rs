use sha2::{Digest, Sha256};

/// Stable SHA-256 hex digest of an entity's tracked content.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
