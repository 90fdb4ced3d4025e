// hasher.rs — SHA-256 hashing utilities.
//
// All hashes in the audit trail are SHA-256, lowercase hex (64 chars).

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::AuditError;

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Hash a UTF-8 string.
pub fn hash_str(s: &str) -> String {
    hash_bytes(s.as_bytes())
}

/// Hash the compact JSON form of a value.
///
/// Used to fingerprint the request an audit record describes, so the record
/// can be matched to a request without storing its free-form context.
pub fn hash_json<T: Serialize + ?Sized>(value: &T) -> Result<String, AuditError> {
    let json = serde_json::to_string(value)?;
    Ok(hash_str(&json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_known_value() {
        // SHA-256("")
        assert_eq!(
            hash_str(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hash_is_lowercase_hex() {
        let hash = hash_str("purchase");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }

    #[test]
    fn json_hash_is_stable_and_content_sensitive() {
        let a = hash_json(&json!({"agentId": "a1", "amount": 10})).unwrap();
        let b = hash_json(&json!({"agentId": "a1", "amount": 10})).unwrap();
        let c = hash_json(&json!({"agentId": "a1", "amount": 11})).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
