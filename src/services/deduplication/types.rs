//! Resolution result types.

use crate::models::{DocumentId, ScoredCluster};
use serde::Serialize;
use std::fmt;

/// What the resolver decided for an incoming document.
///
/// # Example
///
/// ```rust
/// use docanon::Decision;
/// use docanon::DocumentId;
///
/// let decision = Decision::NearDuplicateOf {
///     canonical_id: DocumentId::new(3),
///     score: 0.82,
/// };
/// assert_eq!(decision.canonical_id(), Some(DocumentId::new(3)));
/// assert_eq!(decision.to_string(), "near duplicate of #3 (score 0.820)");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    /// Nothing similar is archived; the document starts its own cluster.
    NewCanonical,
    /// The normalized text is byte-identical to an archived document.
    ExactDuplicateOf {
        /// Canonical of the matched document's cluster.
        canonical_id: DocumentId,
        /// The document whose hash matched.
        matched_document_id: DocumentId,
    },
    /// The aligned text of some archived member meets the threshold.
    NearDuplicateOf {
        /// Canonical of the best-scoring cluster at resolution time.
        canonical_id: DocumentId,
        /// Best aligned similarity against any member of that cluster.
        score: f64,
    },
}

impl Decision {
    /// The matched cluster, if any.
    #[must_use]
    pub const fn canonical_id(&self) -> Option<DocumentId> {
        match self {
            Self::NewCanonical => None,
            Self::ExactDuplicateOf { canonical_id, .. }
            | Self::NearDuplicateOf { canonical_id, .. } => Some(*canonical_id),
        }
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::NewCanonical => "new",
            Self::ExactDuplicateOf { .. } => "exact",
            Self::NearDuplicateOf { .. } => "near",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NewCanonical => f.write_str("new canonical"),
            Self::ExactDuplicateOf { canonical_id, .. } => {
                write!(f, "exact duplicate of #{canonical_id}")
            },
            Self::NearDuplicateOf {
                canonical_id,
                score,
            } => write!(f, "near duplicate of #{canonical_id} (score {score:.3})"),
        }
    }
}

/// Full resolver output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    /// The decision.
    pub decision: Decision,
    /// Other clusters that also met the threshold, best first.
    ///
    /// Non-empty means the document bridges several clusters; they are
    /// merged and the match is queued for review.
    pub competitors: Vec<ScoredCluster>,
    /// Candidate documents scored during the search.
    pub candidates_scored: usize,
}

impl Resolution {
    /// A resolution with no competitors.
    #[must_use]
    pub const fn unambiguous(decision: Decision, candidates_scored: usize) -> Self {
        Self {
            decision,
            competitors: Vec::new(),
            candidates_scored,
        }
    }

    /// Returns true if more than one cluster qualified.
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        !self.competitors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_labels() {
        assert_eq!(Decision::NewCanonical.label(), "new");
        assert_eq!(Decision::NewCanonical.canonical_id(), None);
        let exact = Decision::ExactDuplicateOf {
            canonical_id: DocumentId::new(1),
            matched_document_id: DocumentId::new(4),
        };
        assert_eq!(exact.label(), "exact");
        assert_eq!(exact.to_string(), "exact duplicate of #1");
    }

    #[test]
    fn test_resolution_ambiguity() {
        let mut resolution = Resolution::unambiguous(Decision::NewCanonical, 0);
        assert!(!resolution.is_ambiguous());
        resolution.competitors.push(ScoredCluster {
            canonical_id: DocumentId::new(2),
            score: 0.6,
        });
        assert!(resolution.is_ambiguous());
    }

    #[test]
    fn test_decision_serializes_with_kind_tag() {
        let json = serde_json::to_string(&Decision::NewCanonical).unwrap();
        assert_eq!(json, r#"{"kind":"new_canonical"}"#);
    }
}
