//! Duplicate detection.
//!
//! Two tiers decide whether an ingested document is already archived:
//!
//! 1. **Exact match**: SHA-256 of the normalized text.
//! 2. **Near match**: `MinHash` signatures over character shingles, searched
//!    through an LSH band index. Each candidate is then verified by aligning
//!    its normalized text with the incoming one word by word, and clusters
//!    are ranked by the best verified score.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     DuplicateResolver                        │
//! │  ┌──────────────┐  ┌──────────────────┐  ┌────────────────┐  │
//! │  │ ContentHasher│  │ MinHasher        │  │ QualityAssessor│  │
//! │  │              │  │ + alignment      │  │                │  │
//! │  │ SHA-256 hash │  │ banded lookup,   │  │ canonical      │  │
//! │  │ lookup       │  │ word-diff verify │  │ promotion      │  │
//! │  └──────────────┘  └──────────────────┘  └────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Exact hits short-circuit; quality only matters for near matches.

mod alignment;
mod config;
mod hasher;
mod quality;
mod resolver;
mod signature;
mod types;

pub use alignment::{MAX_MISREAD_SPAN, MISREAD_SIMILARITY, aligned_similarity, similarity_bound};
pub use config::DeduplicationConfig;
pub use hasher::{ContentHasher, Fingerprint, Fingerprinter};
pub use quality::{QualityAssessor, QualityReport};
pub use resolver::DuplicateResolver;
pub use signature::{MinHasher, PERMUTATION_SEED};
pub use types::{Decision, Resolution};
