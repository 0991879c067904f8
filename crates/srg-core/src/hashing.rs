// crates/srg-core/src/hashing.rs
// ============================================================================
// Module: Canonical Hashing
// Description: RFC 8785 JSON canonicalization and content hashing utilities.
// Purpose: Provide deterministic hashes for audit events, request payloads,
//          and webhook bodies.
// Dependencies: serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! The gateway hashes all canonical JSON using RFC 8785 (JCS) to guarantee
//! stable, replayable digests across the audit chain. Binary payloads (e.g.
//! webhook bodies already serialized) are hashed directly over raw bytes.
//!
//! Security posture: these hashes back the tamper-evident audit chain; see
//! [`crate::error::AppError`] for how a hashing failure surfaces to callers.

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

/// Supported hash algorithms for gateway artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// SHA-256 hashing, the only algorithm the audit chain currently uses.
    Sha256,
}

/// Default hash algorithm for the gateway.
pub const DEFAULT_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

/// Deterministic content hash representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashDigest {
    /// Hash algorithm identifier.
    pub algorithm: HashAlgorithm,
    /// Lowercase hex-encoded digest bytes.
    pub value: String,
}

impl HashDigest {
    /// Creates a new digest from raw bytes.
    #[must_use]
    pub fn new(algorithm: HashAlgorithm, bytes: &[u8]) -> Self {
        Self {
            algorithm,
            value: hex_encode(bytes),
        }
    }
}

impl std::fmt::Display for HashDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.value.fmt(f)
    }
}

/// Errors raised when computing canonical hashes.
#[derive(Debug, Error)]
pub enum HashError {
    /// JSON canonicalization failed.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
}

/// Returns canonical JSON bytes for a serializable value using RFC 8785.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

/// Hashes canonical JSON using the provided algorithm.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn hash_canonical_json<T: Serialize + ?Sized>(
    algorithm: HashAlgorithm,
    value: &T,
) -> Result<HashDigest, HashError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(hash_bytes(algorithm, &bytes))
}

/// Hashes raw bytes using the provided algorithm.
#[must_use]
pub fn hash_bytes(algorithm: HashAlgorithm, bytes: &[u8]) -> HashDigest {
    match algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(bytes);
            let digest = hasher.finalize();
            HashDigest::new(HashAlgorithm::Sha256, &digest)
        }
    }
}

/// Hashes a UTF-8 string using the provided algorithm.
#[must_use]
pub fn hash_str(algorithm: HashAlgorithm, text: &str) -> HashDigest {
    hash_bytes(algorithm, text.as_bytes())
}

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::canonical_json_bytes;
    use super::hash_canonical_json;
    use super::hash_str;
    use super::HashAlgorithm;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys() {
        let value = json!({"b": 1, "a": 2});
        let bytes = canonical_json_bytes(&value).expect("canonicalizes");
        assert_eq!(std::str::from_utf8(&bytes).expect("utf8"), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn hash_is_deterministic() {
        let value = json!({"x": 1});
        let first = hash_canonical_json(HashAlgorithm::Sha256, &value).expect("hashes");
        let second = hash_canonical_json(HashAlgorithm::Sha256, &value).expect("hashes");
        assert_eq!(first, second);
    }

    #[test]
    fn hash_str_matches_bytes() {
        let digest = hash_str(HashAlgorithm::Sha256, "");
        assert_eq!(
            digest.value,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b85"
        );
    }
}
