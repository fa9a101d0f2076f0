//! Canonical serialization and content digests.

use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use scout_types::ScoutResult;

/// Canonical bytes of a serializable value.
///
/// Going through `serde_json::Value` sorts every object's keys, so two
/// values with the same content serialize identically regardless of field
/// or insertion order.
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> ScoutResult<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&value)?)
}

/// Lower-case hex SHA-256 of raw bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Digest of the canonical form of `value`.
pub fn content_digest<T: Serialize + ?Sized>(value: &T) -> ScoutResult<String> {
    Ok(sha256_hex(&canonical_bytes(value)?))
}

/// Content-addressed run identifier derived from a digest.
pub fn run_id(digest: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, digest.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn digest_ignores_insertion_order() {
        let mut a = HashMap::new();
        a.insert("zeta", 1.0);
        a.insert("alpha", 2.0);
        let mut b = HashMap::new();
        b.insert("alpha", 2.0);
        b.insert("zeta", 1.0);
        assert_eq!(content_digest(&a).unwrap(), content_digest(&b).unwrap());
    }

    #[test]
    fn digest_is_hex_sha256() {
        let d = sha256_hex(b"");
        assert_eq!(
            d,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn run_id_is_stable() {
        let digest = content_digest(&serde_json::json!({"seed": 7})).unwrap();
        assert_eq!(run_id(&digest), run_id(&digest));
        assert_ne!(run_id(&digest), run_id("other"));
    }
}
