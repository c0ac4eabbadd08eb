//! Content digests embedded in snapshot names.

use sha1::{Digest, Sha1};

/// Lowercase hex SHA-1 of `data`.
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

/// True when `data` still hashes to `expected` (case-insensitive).
pub fn matches(data: &[u8], expected: &str) -> bool {
    content_hash(data).eq_ignore_ascii_case(expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            content_hash(b"abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(content_hash(b"").len(), 40);
    }

    #[test]
    fn test_matches() {
        let hash = content_hash(b"world");
        assert!(matches(b"world", &hash));
        assert!(matches(b"world", &hash.to_uppercase()));
        assert!(!matches(b"world!", &hash));
    }
}
