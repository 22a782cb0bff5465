//! Cluster views and archive statistics.

use super::{Document, DocumentId, Source};
use serde::Serialize;

/// A canonical document together with everything merged into it.
#[derive(Debug, Clone, Serialize)]
pub struct Cluster {
    /// The representative document.
    pub canonical: Document,
    /// Ids of every member, canonical included, ascending.
    pub member_ids: Vec<DocumentId>,
    /// Provenance gathered from every member.
    pub sources: Vec<Source>,
}

impl Cluster {
    /// Number of documents in the cluster.
    #[must_use]
    pub fn len(&self) -> usize {
        self.member_ids.len()
    }

    /// A stored cluster always has its canonical member.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.member_ids.is_empty()
    }
}

/// One row of the multi-member cluster listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterSummary {
    /// Canonical id.
    pub canonical_id: DocumentId,
    /// Documents in the cluster.
    pub member_count: usize,
    /// Sources across all members.
    pub source_count: usize,
    /// Quality of the canonical document.
    pub canonical_quality: Option<u8>,
}

/// Archive-wide deduplication counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    /// Stored documents.
    pub documents: usize,
    /// Clusters (canonical documents).
    pub clusters: usize,
    /// Clusters with more than one member.
    pub multi_member_clusters: usize,
    /// Provenance rows.
    pub sources: usize,
    /// All duplicate edges.
    pub duplicate_edges: usize,
    /// Edges of type `exact`.
    pub exact_edges: usize,
    /// Edges of type `near`.
    pub near_edges: usize,
    /// Ambiguous matches recorded for review.
    pub ambiguous_matches: usize,
}

/// A broken cluster found by a whole-store invariant scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvariantIssue {
    /// Cluster id (the `canonical_id` members point at).
    pub canonical_id: DocumentId,
    /// Description of the violation.
    pub detail: String,
}
