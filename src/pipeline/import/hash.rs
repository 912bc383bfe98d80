use base64::Engine;
use sha2::{Digest, Sha256};

use crate::models::SourceRef;

/// Compute SHA-256 content hash, base64-encoded
pub fn compute_content_hash(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    base64::engine::general_purpose::STANDARD.encode(hash)
}

/// Build the opaque source handle stored on a record in place of the bytes.
pub fn source_ref(bytes: &[u8], mime_type: &str) -> SourceRef {
    SourceRef {
        content_hash: compute_content_hash(bytes),
        byte_len: bytes.len(),
        mime_type: mime_type.to_string(),
    }
}
