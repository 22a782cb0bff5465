//! `MinHash` signatures over character shingles.
//!
//! Near-duplicate detection estimates the Jaccard similarity of two texts'
//! shingle sets. Each of the `n` permutations keeps the minimum hashed value
//! of the set; the fraction of positions where two signatures agree is an
//! unbiased estimate of their Jaccard similarity.

use crate::models::SimilaritySignature;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Mersenne prime `2^61 - 1`, the modulus of the permutation family.
const MERSENNE_61: u64 = (1 << 61) - 1;

/// Fixed seed for the permutation coefficients.
///
/// Signatures are persisted, so the coefficients must never change between
/// runs or releases.
pub const PERMUTATION_SEED: u64 = 0x5EED_D0C5_CA70_0001;

/// Builds `MinHash` signatures for normalized text.
///
/// # Example
///
/// ```rust
/// use docanon::services::deduplication::MinHasher;
///
/// let hasher = MinHasher::new(4, 128);
/// let a = hasher.signature("the deputy director met with staff");
/// let b = hasher.signature("the deputy director met with the staff");
/// assert_eq!(a.len(), 128);
/// assert!(a.similarity(&b) > 0.5);
/// assert!(hasher.signature("").is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct MinHasher {
    shingle_size: usize,
    permutations: Vec<(u64, u64)>,
}

impl MinHasher {
    /// Creates a hasher with `signature_size` permutations over
    /// `shingle_size`-character shingles.
    #[must_use]
    pub fn new(shingle_size: usize, signature_size: usize) -> Self {
        let mut stream = SplitMix64::new(PERMUTATION_SEED);
        let permutations = (0..signature_size)
            .map(|_| {
                let a = stream.next_u64() % (MERSENNE_61 - 1) + 1;
                let b = stream.next_u64() % MERSENNE_61;
                (a, b)
            })
            .collect();
        Self {
            shingle_size: shingle_size.max(1),
            permutations,
        }
    }

    /// Number of values per signature.
    #[must_use]
    pub fn signature_size(&self) -> usize {
        self.permutations.len()
    }

    /// Hashed shingle set of `text`, reduced modulo `2^61 - 1`.
    ///
    /// Empty text has no shingles; non-empty text shorter than the shingle
    /// size is a single shingle.
    #[must_use]
    pub fn shingles(&self, text: &str) -> HashSet<u64> {
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return HashSet::new();
        }
        if chars.len() < self.shingle_size {
            return HashSet::from([shingle_hash(text)]);
        }
        chars
            .windows(self.shingle_size)
            .map(|window| shingle_hash(&window.iter().collect::<String>()))
            .collect()
    }

    /// Computes the signature of normalized text.
    #[must_use]
    pub fn signature(&self, text: &str) -> SimilaritySignature {
        let shingles = self.shingles(text);
        if shingles.is_empty() {
            return SimilaritySignature::empty();
        }
        let values = self
            .permutations
            .iter()
            .map(|&(a, b)| {
                shingles
                    .iter()
                    .map(|&x| permute(a, b, x))
                    .min()
                    .unwrap_or(u64::MAX)
            })
            .collect();
        SimilaritySignature::new(values)
    }
}

/// `(a·x + b) mod (2^61 - 1)` without overflow.
#[allow(clippy::cast_possible_truncation)]
const fn permute(a: u64, b: u64, x: u64) -> u64 {
    ((a as u128 * x as u128 + b as u128) % MERSENNE_61 as u128) as u64
}

fn shingle_hash(shingle: &str) -> u64 {
    let digest = Sha256::digest(shingle.as_bytes());
    let mut word = [0u8; 8];
    word.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(word) % MERSENNE_61
}

/// `SplitMix64` generator for the permutation coefficients.
struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    const fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    const fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splitmix_reference_values() {
        // Reference output for seed 0 from the published SplitMix64 algorithm.
        let mut rng = SplitMix64::new(0);
        assert_eq!(rng.next_u64(), 0xE220_A839_7B1D_CDAF);
        assert_eq!(rng.next_u64(), 0x6E78_9E6A_A1B9_65F4);
    }

    #[test]
    fn test_permutation_coefficients_in_range() {
        let hasher = MinHasher::new(4, 256);
        for &(a, b) in &hasher.permutations {
            assert!(a >= 1 && a < MERSENNE_61);
            assert!(b < MERSENNE_61);
        }
    }

    #[test]
    fn test_shingles_short_and_empty_text() {
        let hasher = MinHasher::new(4, 8);
        assert!(hasher.shingles("").is_empty());
        assert_eq!(hasher.shingles("abc").len(), 1);
        assert_eq!(hasher.shingles("abcd").len(), 1);
        assert_eq!(hasher.shingles("abcde").len(), 2);
        // repeated shingles collapse
        assert_eq!(hasher.shingles("aaaaaaa").len(), 1);
    }

    #[test]
    fn test_shingles_count_characters_not_bytes() {
        let hasher = MinHasher::new(4, 8);
        assert_eq!(hasher.shingles("éèêë").len(), 1);
        assert_eq!(hasher.shingles("éèêëà").len(), 2);
    }

    #[test]
    fn test_identical_text_identical_signature() {
        let hasher = MinHasher::new(4, 64);
        let text = "quarterly inventory report for the northern warehouse facility";
        let a = hasher.signature(text);
        let b = MinHasher::new(4, 64).signature(text);
        assert_eq!(a, b);
        assert!((a.similarity(&b) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unrelated_text_scores_low() {
        let hasher = MinHasher::new(4, 128);
        let a = hasher.signature(
            "the deputy director met with staff from the regional field office to discuss travel",
        );
        let b = hasher.signature(
            "forklift maintenance logs show three units were serviced in april at the dock",
        );
        assert!(a.similarity(&b) < 0.3);
    }

    #[test]
    fn test_permute_no_overflow() {
        let max = MERSENNE_61 - 1;
        assert!(permute(max, max, max) < MERSENNE_61);
    }
}
