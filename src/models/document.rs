//! Documents and their provenance records.

use super::SimilaritySignature;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable identifier assigned to a document at first insert.
///
/// Identifiers grow monotonically with insertion order, which makes "lowest
/// id" a reproducible tie-breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(i64);

impl DocumentId {
    /// Creates a document ID from its raw value.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for DocumentId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl FromStr for DocumentId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('#');
        match trimmed.parse::<i64>() {
            Ok(id) if id > 0 => Ok(Self(id)),
            _ => Err(crate::Error::InvalidInput(format!(
                "'{s}' is not a document id (expected a positive integer)"
            ))),
        }
    }
}

/// A single ingested artifact.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    /// Identifier assigned at first insert.
    pub id: DocumentId,
    /// SHA-256 (hex) of the normalized text.
    pub content_hash: String,
    /// `MinHash` sketch used for near-duplicate search.
    #[serde(skip)]
    pub similarity_signature: SimilaritySignature,
    /// Text exactly as received from the extraction layer.
    pub raw_text: String,
    /// Normalized text, compared word by word when verifying near matches.
    #[serde(skip)]
    pub normalized_text: String,
    /// Length of the normalized text in characters.
    pub normalized_text_length: usize,
    /// OCR reliability (0-100); `None` when the text was not produced by OCR.
    pub ocr_quality_score: Option<u8>,
    /// Canonical representative of this document's cluster.
    pub canonical_id: DocumentId,
    /// Page count reported by the extraction layer.
    pub page_count: Option<u32>,
    /// Byte size of the original artifact.
    pub byte_count: Option<u64>,
    /// When the document was first inserted.
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Returns true if this document represents its cluster.
    #[must_use]
    pub fn is_canonical(&self) -> bool {
        self.canonical_id == self.id
    }

    /// Quality used when comparing canonical candidates.
    ///
    /// Native text (no OCR) is treated as fully reliable.
    #[must_use]
    pub fn effective_quality(&self) -> u8 {
        self.ocr_quality_score.unwrap_or(100)
    }
}

/// Fields needed to insert a document; the store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct NewDocument {
    /// SHA-256 (hex) of the normalized text.
    pub content_hash: String,
    /// `MinHash` sketch.
    pub similarity_signature: SimilaritySignature,
    /// Raw extracted text.
    pub raw_text: String,
    /// Output of the normalizer.
    pub normalized_text: String,
    /// Length of the normalized text in characters.
    pub normalized_text_length: usize,
    /// OCR reliability, if the text came from OCR.
    pub ocr_quality_score: Option<u8>,
    /// Page count from the extraction layer.
    pub page_count: Option<u32>,
    /// Byte size of the original artifact.
    pub byte_count: Option<u64>,
}

/// Where a document was obtained, as described by the ingestion caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Collection or download source, e.g. `courtlistener` or `foia-2019-113`.
    pub origin_name: String,
    /// URL or path within the origin.
    pub origin_locator: String,
    /// When the content was fetched.
    pub retrieved_at: DateTime<Utc>,
}

impl SourceDescriptor {
    /// Creates a descriptor retrieved now.
    #[must_use]
    pub fn new(origin_name: impl Into<String>, origin_locator: impl Into<String>) -> Self {
        Self {
            origin_name: origin_name.into(),
            origin_locator: origin_locator.into(),
            retrieved_at: Utc::now(),
        }
    }

    /// Sets the retrieval time.
    #[must_use]
    pub const fn with_retrieved_at(mut self, retrieved_at: DateTime<Utc>) -> Self {
        self.retrieved_at = retrieved_at;
        self
    }
}

/// Provenance row: one origin that supplied a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Source {
    /// Row identifier.
    pub id: i64,
    /// Document the content was attached to.
    pub document_id: DocumentId,
    /// Collection or download source.
    pub origin_name: String,
    /// URL or path within the origin.
    pub origin_locator: String,
    /// Most recent retrieval time.
    pub retrieved_at: DateTime<Utc>,
}

/// Result of recording a source: the row and whether it was newly created.
#[derive(Debug, Clone)]
pub struct RecordedSource {
    /// The stored row after the write.
    pub source: Source,
    /// `false` when an existing (document, locator) row was refreshed.
    pub created: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id_parse() {
        assert_eq!("42".parse::<DocumentId>().ok(), Some(DocumentId::new(42)));
        assert_eq!("#7".parse::<DocumentId>().ok(), Some(DocumentId::new(7)));
        assert!("0".parse::<DocumentId>().is_err());
        assert!("-3".parse::<DocumentId>().is_err());
        assert!("abc".parse::<DocumentId>().is_err());
    }

    #[test]
    fn test_document_id_ordering() {
        assert!(DocumentId::new(1) < DocumentId::new(2));
        assert_eq!(DocumentId::from(5).to_string(), "5");
    }

    #[test]
    fn test_effective_quality_defaults_native_text_to_full() {
        let doc = Document {
            id: DocumentId::new(1),
            content_hash: String::new(),
            similarity_signature: SimilaritySignature::empty(),
            raw_text: String::new(),
            normalized_text: String::new(),
            normalized_text_length: 0,
            ocr_quality_score: None,
            canonical_id: DocumentId::new(1),
            page_count: None,
            byte_count: None,
            created_at: Utc::now(),
        };
        assert!(doc.is_canonical());
        assert_eq!(doc.effective_quality(), 100);
    }
}
