//! Content hashing for tamper evidence.
//!
//! Payloads are hashed over their canonical JSON form. `serde_json::Value`
//! keeps object keys in sorted order, so two payloads with the same content
//! always produce the same bytes.

use sha2::{Digest, Sha256};

use crate::types::AuditAction;

/// Previous-hash value for the first entry of every channel.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// SHA-256 of the canonical JSON encoding of `payload`, hex encoded.
pub fn content_hash(payload: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Chain hash linking an entry to its predecessor.
pub fn chain_hash(
    previous_hash: &str,
    sequence: u64,
    action: AuditAction,
    content_hash: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(previous_hash.as_bytes());
    hasher.update(sequence.to_be_bytes());
    hasher.update(action.as_str().as_bytes());
    hasher.update(content_hash.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_hash_is_key_order_independent() {
        let a: serde_json::Value = serde_json::from_str(r#"{"b":1,"a":2}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"a":2,"b":1}"#).unwrap();
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_content_hash_detects_change() {
        let a = json!({"message_id": "m1", "votes": 5});
        let b = json!({"message_id": "m1", "votes": 6});
        assert_ne!(content_hash(&a), content_hash(&b));
        assert_eq!(content_hash(&a).len(), 64);
    }

    #[test]
    fn test_chain_hash_depends_on_predecessor() {
        let content = content_hash(&json!({}));
        let first = chain_hash(GENESIS_HASH, 0, AuditAction::VoteCast, &content);
        let other = chain_hash(&first, 0, AuditAction::VoteCast, &content);
        assert_ne!(first, other);
    }
}
