//! # Docanon
//!
//! Content-addressed deduplication and canonicalization for document archives
//! fed by overlapping, noisy sources.
//!
//! Documents arrive as already-extracted text (OCR output, email bodies, PDF
//! text layers) together with a description of where they came from. Docanon
//! decides whether each one is new, an exact duplicate, or a near duplicate of
//! something already archived, keeps exactly one canonical copy per cluster,
//! and records provenance from every source that ever supplied the content.
//!
//! ## Pipeline
//!
//! ```text
//! raw text ──► Normalizer ──► Hasher ──► Quality Assessor
//!                                 │
//!                                 ▼
//!                       Duplicate Resolver ──► Store (SQLite + band index)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use docanon::{CanonicalizationService, DocanonConfig, IngestRequest, SourceDescriptor};
//!
//! let service = CanonicalizationService::open(&DocanonConfig::default())?;
//! let outcome = service.ingest(IngestRequest::new(
//!     "Memo dated 3/4/19 re: travel arrangements",
//!     SourceDescriptor::new("foia-2019-113", "https://example.org/release/113.pdf"),
//! ))?;
//! println!("{}", outcome.decision);
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod config;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

pub use config::DocanonConfig;
pub use models::{
    AmbiguousMatch, ArchiveParameters, Cluster, ClusterSummary, DedupStats, Document, DocumentId, DuplicateEdge,
    IngestRequest, MatchType, Source, SourceDescriptor,
};
pub use services::{
    CanonicalizationService, Decision, DuplicateResolver, IngestOutcome, Normalizer,
    QualityAssessor,
};
pub use storage::{DocumentStore, SqliteDocumentStore, StoreTransaction};

/// Error type for docanon operations.
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Malformed ids, invalid configuration, bad regex patterns |
/// | `NotFound` | A document id does not exist in the store |
/// | `OperationFailed` | I/O errors, SQL errors, logging initialization failures |
/// | `Contention` | The store stayed locked through every retry attempt |
/// | `InvariantViolation` | A cluster read back with zero or several canonical claimants |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The store was busy for every attempt of the retry policy.
    ///
    /// Callers may requeue the document; nothing was written.
    #[error("operation '{operation}' gave up after {attempts} attempts: store is locked")]
    Contention {
        /// The operation that was retried.
        operation: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// A stored cluster violates the single-canonical invariant.
    ///
    /// Indicates an earlier bug or manual tampering. Only reads touching the
    /// affected cluster fail.
    #[error("cluster {canonical_id} violates the canonical invariant: {detail}")]
    InvariantViolation {
        /// The cluster (canonical id) that failed validation.
        canonical_id: i64,
        /// What was wrong.
        detail: String,
    },
}

impl Error {
    /// Returns true if retrying the same call later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Contention { .. })
    }
}

/// Result type alias for docanon operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("bad id".to_string());
        assert_eq!(err.to_string(), "invalid input: bad id");

        let err = Error::OperationFailed {
            operation: "open_store".to_string(),
            cause: "disk full".to_string(),
        };
        assert_eq!(err.to_string(), "operation 'open_store' failed: disk full");

        let err = Error::Contention {
            operation: "ingest".to_string(),
            attempts: 3,
        };
        assert_eq!(
            err.to_string(),
            "operation 'ingest' gave up after 3 attempts: store is locked"
        );

        let err = Error::InvariantViolation {
            canonical_id: 7,
            detail: "2 canonical claimants".to_string(),
        };
        assert!(err.to_string().contains("cluster 7"));
    }

    #[test]
    fn test_only_contention_is_retryable() {
        assert!(
            Error::Contention {
                operation: "x".to_string(),
                attempts: 3
            }
            .is_retryable()
        );
        assert!(!Error::NotFound("1".to_string()).is_retryable());
        assert!(
            !Error::InvariantViolation {
                canonical_id: 1,
                detail: String::new()
            }
            .is_retryable()
        );
    }
}
