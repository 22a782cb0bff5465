//! Near-duplicate signature value type.

use sha2::{Digest, Sha256};

/// Fixed-size `MinHash` sketch of a document's shingle set.
///
/// An empty signature means the normalized text produced no shingles; it
/// never matches anything.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SimilaritySignature(Vec<u64>);

impl SimilaritySignature {
    /// Wraps raw `MinHash` values.
    #[must_use]
    pub const fn new(values: Vec<u64>) -> Self {
        Self(values)
    }

    /// Signature for text without shingles.
    #[must_use]
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    /// Returns true if the signature carries no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of `MinHash` values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Raw `MinHash` values.
    #[must_use]
    pub fn values(&self) -> &[u64] {
        &self.0
    }

    /// Estimated Jaccard similarity: the fraction of positions that agree.
    ///
    /// Returns 0.0 when either side is empty or the sizes differ.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn similarity(&self, other: &Self) -> f64 {
        if self.is_empty() || self.0.len() != other.0.len() {
            return 0.0;
        }
        let equal = self
            .0
            .iter()
            .zip(&other.0)
            .filter(|(a, b)| a == b)
            .count();
        equal as f64 / self.0.len() as f64
    }

    /// Locality-sensitive band keys.
    ///
    /// The signature is cut into `bands` equal slices; each slice and its band
    /// index hash to one key. Two signatures sharing any key are candidates.
    /// Returns no keys for an empty signature or a band count that does not
    /// divide the signature length.
    #[must_use]
    pub fn band_keys(&self, bands: usize) -> Vec<u64> {
        if self.is_empty() || bands == 0 || self.0.len() % bands != 0 {
            return Vec::new();
        }
        let rows = self.0.len() / bands;
        self.0
            .chunks(rows)
            .enumerate()
            .map(|(band, values)| {
                let mut hasher = Sha256::new();
                hasher.update((band as u64).to_le_bytes());
                for value in values {
                    hasher.update(value.to_le_bytes());
                }
                let digest = hasher.finalize();
                let mut key = [0u8; 8];
                key.copy_from_slice(&digest[..8]);
                u64::from_le_bytes(key)
            })
            .collect()
    }

    /// Little-endian byte encoding for storage.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Decodes the storage encoding; trailing partial words are ignored.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let values = bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut word = [0u8; 8];
                word.copy_from_slice(chunk);
                u64::from_le_bytes(word)
            })
            .collect();
        Self(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_counts_agreeing_positions() {
        let a = SimilaritySignature::new(vec![1, 2, 3, 4]);
        let b = SimilaritySignature::new(vec![1, 2, 9, 9]);
        assert!((a.similarity(&b) - 0.5).abs() < f64::EPSILON);
        assert!((a.similarity(&a) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_never_matches() {
        let empty = SimilaritySignature::empty();
        assert!(empty.similarity(&empty).abs() < f64::EPSILON);
        assert!(empty.band_keys(4).is_empty());
    }

    #[test]
    fn test_size_mismatch_is_zero() {
        let a = SimilaritySignature::new(vec![1, 2]);
        let b = SimilaritySignature::new(vec![1, 2, 3]);
        assert!(a.similarity(&b).abs() < f64::EPSILON);
    }

    #[test]
    fn test_band_keys_shared_only_for_equal_bands() {
        let a = SimilaritySignature::new(vec![1, 2, 3, 4, 5, 6, 7, 8]);
        let b = SimilaritySignature::new(vec![1, 2, 30, 40, 50, 60, 70, 80]);
        let ka = a.band_keys(4);
        let kb = b.band_keys(4);
        assert_eq!(ka.len(), 4);
        assert_eq!(ka[0], kb[0]);
        assert_ne!(ka[1], kb[1]);
    }

    #[test]
    fn test_band_keys_depend_on_band_position() {
        let sig = SimilaritySignature::new(vec![7, 7, 7, 7]);
        let keys = sig.band_keys(2);
        assert_ne!(keys[0], keys[1]);
    }

    #[test]
    fn test_band_keys_reject_uneven_split() {
        let sig = SimilaritySignature::new(vec![1, 2, 3]);
        assert!(sig.band_keys(2).is_empty());
    }

    #[test]
    fn test_bytes_roundtrip() {
        let sig = SimilaritySignature::new(vec![0, 1, u64::MAX, 42]);
        assert_eq!(SimilaritySignature::from_bytes(&sig.to_bytes()), sig);
    }
}
