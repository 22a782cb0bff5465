//! Content fingerprinting for deduplication.
//!
//! A fingerprint pairs a SHA-256 content hash (exact match) with a `MinHash`
//! signature (near match). Both are pure functions of the normalized text.

use super::{DeduplicationConfig, MinHasher};
use crate::models::SimilaritySignature;
use sha2::{Digest, Sha256};

/// SHA-256 content hasher.
///
/// # Example
///
/// ```rust
/// use docanon::services::deduplication::ContentHasher;
///
/// let hash = ContentHasher::hash("memo re travel arrangements");
/// assert_eq!(hash.len(), 64);
/// assert_eq!(hash, ContentHasher::hash("memo re travel arrangements"));
/// ```
pub struct ContentHasher;

impl ContentHasher {
    /// Lowercase hex SHA-256 of the UTF-8 bytes (64 characters).
    #[must_use]
    pub fn hash(normalized_text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(normalized_text.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Short prefix for log lines and CLI output.
    #[must_use]
    pub fn short(hash: &str) -> &str {
        hash.get(..12).unwrap_or(hash)
    }
}

/// Identity of a normalized text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// SHA-256 hex digest.
    pub content_hash: String,
    /// `MinHash` signature.
    pub signature: SimilaritySignature,
}

/// Computes [`Fingerprint`]s with a fixed set of signature parameters.
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    minhash: MinHasher,
}

impl Fingerprinter {
    /// Creates a fingerprinter.
    #[must_use]
    pub fn new(shingle_size: usize, signature_size: usize) -> Self {
        Self {
            minhash: MinHasher::new(shingle_size, signature_size),
        }
    }

    /// Creates a fingerprinter from deduplication settings.
    #[must_use]
    pub fn from_config(config: &DeduplicationConfig) -> Self {
        Self::new(config.shingle_size, config.signature_size)
    }

    /// Fingerprints normalized text.
    #[must_use]
    pub fn fingerprint(&self, normalized_text: &str) -> Fingerprint {
        Fingerprint {
            content_hash: ContentHasher::hash(normalized_text),
            signature: self.minhash.signature(normalized_text),
        }
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::from_config(&DeduplicationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_known_value() {
        // SHA-256 of the empty string
        assert_eq!(
            ContentHasher::hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_hash_is_lowercase_hex() {
        let hash = ContentHasher::hash("federal court records");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_hash_distinguishes_content() {
        assert_ne!(ContentHasher::hash("page one"), ContentHasher::hash("page two"));
    }

    #[test]
    fn test_short() {
        let hash = ContentHasher::hash("x");
        assert_eq!(ContentHasher::short(&hash).len(), 12);
        assert_eq!(ContentHasher::short("abc"), "abc");
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let fp = Fingerprinter::default();
        let a = fp.fingerprint("memorandum for the record");
        let b = fp.fingerprint("memorandum for the record");
        assert_eq!(a, b);
        assert_eq!(a.signature.len(), 128);
    }

    #[test]
    fn test_fingerprint_empty_text() {
        let fp = Fingerprinter::default().fingerprint("");
        assert!(fp.signature.is_empty());
        assert_eq!(fp.content_hash.len(), 64);
    }
}
