//! Content fingerprints for evidence integrity.

use crate::models::RawResult;
use serde_json::json;
use sha2::{Digest, Sha256};

/// Deterministic SHA-256 hex digest of a raw result.
///
/// The digest covers the identifier, the source, and the raw result fields
/// serialized as canonical JSON (object keys sorted). Observation time is not
/// part of the digest, so a re-poll returning the same payload re-confirms
/// the same fingerprint.
pub fn fingerprint(identifier: &str, source: &str, raw: &RawResult) -> String {
    let canonical = json!({
        "identifier": identifier,
        "source": source,
        "class": raw.class,
        "status_code": raw.status_code,
        "payload": raw.payload,
        "hint": raw.hint,
    });
    let digest = Sha256::digest(canonical.to_string().as_bytes());
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let raw = RawResult::success("<IdList><Id>1</Id></IdList>");
        let a = fingerprint("M1", "ncbi", &raw);
        let b = fingerprint("M1", "ncbi", &raw.clone());
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_covers_every_field() {
        let raw = RawResult::success("payload");
        let base = fingerprint("M1", "ncbi", &raw);

        assert_ne!(base, fingerprint("M2", "ncbi", &raw));
        assert_ne!(base, fingerprint("M1", "ena", &raw));
        assert_ne!(base, fingerprint("M1", "ncbi", &RawResult::success("other")));

        let hinted = RawResult {
            hint: Some("withheld".to_string()),
            ..raw.clone()
        };
        assert_ne!(base, fingerprint("M1", "ncbi", &hinted));
    }
}
