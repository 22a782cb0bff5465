//! Fingerprinting parameters recorded in an archive.

use crate::services::deduplication::{DeduplicationConfig, PERMUTATION_SEED};
use crate::services::normalize::NormalizerConfig;
use crate::{Error, Result};
use sha2::{Digest, Sha256};

/// Settings that stored hashes, signatures and band keys depend on.
///
/// An archive records these when it is created. Opening it with different
/// settings would make new fingerprints incomparable with stored ones, so
/// the mismatch is reported instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveParameters {
    /// Characters per shingle.
    pub shingle_size: usize,
    /// `MinHash` values per signature.
    pub signature_size: usize,
    /// LSH bands per signature.
    pub bands: usize,
    /// Seed of the `MinHash` permutation family.
    pub signature_seed: u64,
    /// Digest of the normalizer settings.
    pub normalizer: String,
}

impl ArchiveParameters {
    /// Derives the parameters from the dedup and normalizer settings.
    #[must_use]
    pub fn from_settings(dedup: &DeduplicationConfig, normalize: &NormalizerConfig) -> Self {
        Self {
            shingle_size: dedup.shingle_size,
            signature_size: dedup.signature_size,
            bands: dedup.bands,
            signature_seed: PERMUTATION_SEED,
            normalizer: normalizer_digest(normalize),
        }
    }

    /// `(name, value)` pairs in storage form.
    #[must_use]
    pub fn entries(&self) -> [(&'static str, String); 5] {
        [
            ("shingle_size", self.shingle_size.to_string()),
            ("signature_size", self.signature_size.to_string()),
            ("bands", self.bands.to_string()),
            ("signature_seed", format!("{:#x}", self.signature_seed)),
            ("normalizer", self.normalizer.clone()),
        ]
    }

    /// Checks that `self` (what the archive recorded) matches `configured`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the first differing parameter.
    pub fn ensure_matches(&self, configured: &Self) -> Result<()> {
        let stored = self.entries();
        let wanted = configured.entries();
        for ((name, recorded), (_, value)) in stored.iter().zip(&wanted) {
            if recorded != value {
                return Err(Error::InvalidInput(format!(
                    "archive was built with {name} = {recorded}, configuration has {value}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for ArchiveParameters {
    fn default() -> Self {
        Self::from_settings(&DeduplicationConfig::default(), &NormalizerConfig::default())
    }
}

/// First 16 hex characters of a SHA-256 over the normalizer settings.
///
/// Disabled passes are sorted first; their order has no effect on output.
fn normalizer_digest(config: &NormalizerConfig) -> String {
    let mut disabled: Vec<&str> = config.disabled_passes.iter().map(String::as_str).collect();
    disabled.sort_unstable();
    disabled.dedup();

    let mut hasher = Sha256::new();
    for pass in disabled {
        hasher.update(pass.as_bytes());
        hasher.update([0]);
    }
    hasher.update([1]);
    for pattern in &config.page_patterns {
        hasher.update(pattern.as_bytes());
        hasher.update([0]);
    }
    hasher.update([1]);
    hasher.update(config.single_letter_allowlist.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}
