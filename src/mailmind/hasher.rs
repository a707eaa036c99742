use sha2::{Digest, Sha256};

/// SHA-256 of the UTF-8 bytes of `text`, lowercase hex.
///
/// Used both for message bodies and for identifiers; an identifier is hashed
/// as a string, never resolved to its content first.
pub fn digest(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
