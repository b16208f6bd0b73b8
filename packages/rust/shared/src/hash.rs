//! Structural hashing used for cache keys and invalidation fingerprints.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// SHA-256 of a string, hex encoded.
pub fn hash_str(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Hash of the canonical JSON form of `value`.
///
/// Values are first converted to `serde_json::Value`, whose object maps are
/// key-ordered, so two structurally equal inputs hash identically no matter
/// how their maps were built.
pub fn structural_hash<T: Serialize + ?Sized>(value: &T) -> String {
    let canonical = serde_json::to_value(value)
        .map(|v| v.to_string())
        .unwrap_or_default();
    hash_str(&canonical)
}
