//! Deduplication configuration.
//!
//! Shingle, signature and banding parameters plus the decision thresholds
//! used by the resolver.

use serde::{Deserialize, Serialize};

/// Configuration for fingerprinting and duplicate resolution.
///
/// # Environment Variables
///
/// | Variable | Type | Default | Description |
/// |----------|------|---------|-------------|
/// | `DOCANON_DEDUP_SHINGLE_SIZE` | usize | `4` | Characters per shingle |
/// | `DOCANON_DEDUP_SIGNATURE_SIZE` | usize | `128` | `MinHash` values per signature |
/// | `DOCANON_DEDUP_BANDS` | usize | `32` | LSH bands (must divide the signature size) |
/// | `DOCANON_DEDUP_THRESHOLD` | f64 | `0.85` | Minimum aligned similarity for a near match |
/// | `DOCANON_DEDUP_PROMOTION_MARGIN` | u8 | `10` | Quality lead needed to replace a canonical |
/// | `DOCANON_DEDUP_MAX_CANDIDATES` | usize | `64` | Candidates scored per ingestion |
///
/// # Example
///
/// ```rust
/// use docanon::services::deduplication::DeduplicationConfig;
///
/// let config = DeduplicationConfig::default();
/// assert_eq!(config.signature_size, 128);
/// assert_eq!(config.rows_per_band(), 4);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeduplicationConfig {
    /// Characters per shingle.
    pub shingle_size: usize,

    /// Number of `MinHash` permutations.
    pub signature_size: usize,

    /// Number of LSH bands the signature is cut into.
    pub bands: usize,

    /// Aligned similarity at or above which a candidate cluster qualifies.
    pub similarity_threshold: f64,

    /// A near duplicate is promoted only when its quality exceeds the
    /// canonical's by more than this many points.
    pub promotion_margin: u8,

    /// Upper bound on candidate documents scored per ingestion.
    pub max_candidates: usize,
}

impl DeduplicationConfig {
    /// Creates a configuration from environment variables.
    ///
    /// Falls back to defaults for any unset or unparsable variable.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies `DOCANON_DEDUP_*` environment overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse("DOCANON_DEDUP_SHINGLE_SIZE") {
            self.shingle_size = v;
        }
        if let Some(v) = env_parse("DOCANON_DEDUP_SIGNATURE_SIZE") {
            self.signature_size = v;
        }
        if let Some(v) = env_parse("DOCANON_DEDUP_BANDS") {
            self.bands = v;
        }
        if let Some(v) = env_parse("DOCANON_DEDUP_THRESHOLD") {
            self.similarity_threshold = v;
        }
        if let Some(v) = env_parse("DOCANON_DEDUP_PROMOTION_MARGIN") {
            self.promotion_margin = v;
        }
        if let Some(v) = env_parse("DOCANON_DEDUP_MAX_CANDIDATES") {
            self.max_candidates = v;
        }
        self
    }

    /// Rows per LSH band.
    #[must_use]
    pub const fn rows_per_band(&self) -> usize {
        if self.bands == 0 {
            0
        } else {
            self.signature_size / self.bands
        }
    }

    /// Checks parameter consistency.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] when the threshold is outside
    /// `[0, 1]`, the shingle size, signature size, band count or candidate cap
    /// is zero, or the band count does not divide the signature size.
    pub fn validate(&self) -> crate::Result<()> {
        let invalid = |msg: String| Err(crate::Error::InvalidInput(msg));

        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return invalid(format!(
                "similarity_threshold must be within [0, 1], got {}",
                self.similarity_threshold
            ));
        }
        if self.shingle_size == 0 {
            return invalid("shingle_size must be at least 1".to_string());
        }
        if self.signature_size == 0 || self.bands == 0 {
            return invalid("signature_size and bands must be at least 1".to_string());
        }
        if self.signature_size % self.bands != 0 {
            return invalid(format!(
                "bands ({}) must divide signature_size ({})",
                self.bands, self.signature_size
            ));
        }
        if self.max_candidates == 0 {
            return invalid("max_candidates must be at least 1".to_string());
        }
        Ok(())
    }

    /// Builder method to set the shingle size.
    #[must_use]
    pub const fn with_shingle_size(mut self, size: usize) -> Self {
        self.shingle_size = size;
        self
    }

    /// Builder method to set signature size and band count together.
    #[must_use]
    pub const fn with_signature(mut self, signature_size: usize, bands: usize) -> Self {
        self.signature_size = signature_size;
        self.bands = bands;
        self
    }

    /// Builder method to set the similarity threshold.
    #[must_use]
    pub const fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Builder method to set the promotion margin.
    #[must_use]
    pub const fn with_promotion_margin(mut self, margin: u8) -> Self {
        self.promotion_margin = margin;
        self
    }

    /// Builder method to set the candidate cap.
    #[must_use]
    pub const fn with_max_candidates(mut self, max: usize) -> Self {
        self.max_candidates = max;
        self
    }
}

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self {
            shingle_size: 4,
            signature_size: 128,
            bands: 32,
            similarity_threshold: 0.85,
            promotion_margin: 10,
            max_candidates: 64,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
