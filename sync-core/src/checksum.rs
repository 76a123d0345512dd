//! Per-item checksums for upload payloads.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of `data`.
pub fn checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
