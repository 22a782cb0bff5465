//! Business logic services.
//!
//! - [`normalize`]: deterministic text normalization
//! - [`deduplication`]: hashing, signatures, quality scoring and resolution
//! - `canonicalize`: the ingestion driver tying them to the store

mod canonicalize;
pub mod deduplication;
pub mod normalize;

pub use canonicalize::{CanonicalizationService, IngestOutcome};
pub use deduplication::{
    ContentHasher, Decision, DeduplicationConfig, DuplicateResolver, Fingerprint, Fingerprinter,
    MinHasher, QualityAssessor, QualityReport, Resolution,
};
pub use normalize::{Normalizer, NormalizerConfig};
