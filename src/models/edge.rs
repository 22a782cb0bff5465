//! Duplicate relationships and review records.

use super::DocumentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a duplicate relationship was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// Normalized text hashes were identical.
    Exact,
    /// Signatures overlapped above the similarity threshold.
    Near,
}

impl MatchType {
    /// Returns the stored string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Near => "near",
        }
    }

    /// Parses the stored string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exact" => Some(Self::Exact),
            "near" => Some(Self::Near),
            _ => None,
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only audit record of a detected duplicate relationship.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateEdge {
    /// Append order.
    pub id: i64,
    /// Document that was found to duplicate an existing cluster.
    pub document_id: DocumentId,
    /// Canonical of the matched cluster at decision time.
    pub matched_canonical_id: DocumentId,
    /// Similarity in `[0, 1]`; exact matches record 1.0.
    pub similarity_score: f64,
    /// Detection method.
    pub match_type: MatchType,
    /// Source row whose ingestion produced this edge.
    pub source_id: Option<i64>,
    /// When the decision was made.
    pub decided_at: DateTime<Utc>,
}

/// Edge fields supplied by the writer.
#[derive(Debug, Clone)]
pub struct NewDuplicateEdge {
    /// Duplicating document.
    pub document_id: DocumentId,
    /// Canonical it matched.
    pub matched_canonical_id: DocumentId,
    /// Similarity in `[0, 1]`.
    pub similarity_score: f64,
    /// Detection method.
    pub match_type: MatchType,
    /// Source row that triggered the match.
    pub source_id: Option<i64>,
}

/// Best similarity a new document reached against one cluster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredCluster {
    /// Cluster canonical id.
    pub canonical_id: DocumentId,
    /// Highest member similarity.
    pub score: f64,
}

/// A near-duplicate decision where several clusters qualified.
///
/// The highest score won (lowest canonical id on ties); the record keeps the
/// losers so a reviewer can merge clusters by hand if needed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AmbiguousMatch {
    /// Review row identifier.
    pub id: i64,
    /// The newly ingested document.
    pub document_id: DocumentId,
    /// Cluster the document was attached to.
    pub chosen_canonical_id: DocumentId,
    /// Winning score.
    pub chosen_score: f64,
    /// Every other qualifying cluster.
    pub competitors: Vec<ScoredCluster>,
    /// When the ambiguity was recorded.
    pub flagged_at: DateTime<Utc>,
    /// Set once a reviewer has looked at the record.
    pub resolved: bool,
}
