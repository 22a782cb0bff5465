//! Duplicate resolution.
//!
//! Decides, for one fingerprint, whether the document is new, an exact copy
//! or a near copy of archived clusters, and whether a near copy should take
//! over as the cluster's canonical.

use super::{
    ContentHasher, Decision, DeduplicationConfig, Fingerprint, Resolution, aligned_similarity,
    similarity_bound,
};
use crate::Result;
use crate::models::{Document, DocumentId, ScoredCluster, SimilaritySignature};
use crate::storage::StoreTransaction;
use std::collections::BTreeMap;
use tracing::instrument;

/// Signature agreement below which a band-index candidate is not verified.
///
/// Pages whose aligned similarity clears any useful threshold keep well over
/// this fraction of their shingles even under heavy OCR noise.
pub const MIN_SIGNATURE_AGREEMENT: f64 = 0.2;

/// Resolves fingerprints against the store.
///
/// # Resolution Order
///
/// 1. Exact lookup by content hash. A hit is definitive.
/// 2. Candidate search through the band index, capped at `max_candidates`.
/// 3. Each candidate is verified with [`aligned_similarity`] on normalized
///    text. Clusters whose best verified score meets the threshold qualify,
///    best first, ties going to the lowest canonical id.
/// 4. Otherwise the document is a new canonical.
///
/// Every qualifying cluster is returned: the caller merges them, so the
/// final grouping does not depend on which document arrived first.
#[derive(Debug, Clone)]
pub struct DuplicateResolver {
    similarity_threshold: f64,
    max_candidates: usize,
    promotion_margin: u8,
}

impl DuplicateResolver {
    /// Creates a resolver from deduplication settings.
    #[must_use]
    pub const fn new(config: &DeduplicationConfig) -> Self {
        Self {
            similarity_threshold: config.similarity_threshold,
            max_candidates: config.max_candidates,
            promotion_margin: config.promotion_margin,
        }
    }

    /// Similarity threshold in use.
    #[must_use]
    pub const fn similarity_threshold(&self) -> f64 {
        self.similarity_threshold
    }

    /// Resolves a fingerprint of `normalized` inside an open transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if a store lookup fails.
    #[instrument(
        skip(self, tx, normalized, fingerprint),
        fields(
            operation = "resolve",
            content_hash = ContentHasher::short(&fingerprint.content_hash),
        )
    )]
    pub fn resolve(
        &self,
        tx: &dyn StoreTransaction,
        normalized: &str,
        fingerprint: &Fingerprint,
    ) -> Result<Resolution> {
        if let Some(existing) = tx.find_by_content_hash(&fingerprint.content_hash)? {
            tracing::debug!(
                document_id = %existing.id,
                canonical_id = %existing.canonical_id,
                "exact content hash match"
            );
            return Ok(Resolution::unambiguous(
                Decision::ExactDuplicateOf {
                    canonical_id: existing.canonical_id,
                    matched_document_id: existing.id,
                },
                0,
            ));
        }

        if fingerprint.signature.is_empty() {
            return Ok(Resolution::unambiguous(Decision::NewCanonical, 0));
        }

        let candidates =
            tx.find_candidates_by_signature(&fingerprint.signature, self.max_candidates)?;
        let mut ranked = self.rank_clusters(normalized, &fingerprint.signature, &candidates);
        tracing::debug!(
            candidates = candidates.len(),
            qualifying_clusters = ranked.len(),
            "scored near-duplicate candidates"
        );

        if ranked.is_empty() {
            return Ok(Resolution::unambiguous(
                Decision::NewCanonical,
                candidates.len(),
            ));
        }

        let best = ranked.remove(0);
        Ok(Resolution {
            decision: Decision::NearDuplicateOf {
                canonical_id: best.canonical_id,
                score: best.score,
            },
            competitors: ranked,
            candidates_scored: candidates.len(),
        })
    }

    /// Best verified score per cluster for clusters meeting the threshold,
    /// best first.
    ///
    /// Ties are ordered by ascending canonical id, so the result does not
    /// depend on candidate order.
    #[must_use]
    pub fn rank_clusters(
        &self,
        normalized: &str,
        signature: &SimilaritySignature,
        candidates: &[Document],
    ) -> Vec<ScoredCluster> {
        let mut best: BTreeMap<DocumentId, f64> = BTreeMap::new();
        for candidate in candidates {
            if signature.similarity(&candidate.similarity_signature) < MIN_SIGNATURE_AGREEMENT
                || similarity_bound(normalized, &candidate.normalized_text)
                    < self.similarity_threshold
            {
                continue;
            }
            let score = aligned_similarity(normalized, &candidate.normalized_text);
            best.entry(candidate.canonical_id)
                .and_modify(|s| *s = s.max(score))
                .or_insert(score);
        }

        let mut ranked: Vec<ScoredCluster> = best
            .into_iter()
            .filter(|&(_, score)| score >= self.similarity_threshold)
            .map(|(canonical_id, score)| ScoredCluster {
                canonical_id,
                score,
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.canonical_id.cmp(&b.canonical_id))
        });
        ranked
    }

    /// Whether a new member should replace the current canonical.
    ///
    /// Requires the newcomer's quality to exceed the canonical's by strictly
    /// more than the promotion margin. Missing scores (native text) count as
    /// 100.
    #[must_use]
    pub fn should_promote(&self, new_quality: Option<u8>, canonical_quality: Option<u8>) -> bool {
        let new_quality = u16::from(new_quality.unwrap_or(100));
        let canonical_quality = u16::from(canonical_quality.unwrap_or(100));
        new_quality > canonical_quality + u16::from(self.promotion_margin)
    }
}

impl Default for DuplicateResolver {
    fn default() -> Self {
        Self::new(&DeduplicationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use test_case::test_case;

    const BUDGET: &str = "the committee approved the revised budget for the harbor dredging \
        project and asked staff to report on contract deadlines before the next meeting";

    fn doc(id: i64, canonical: i64, text: &str) -> Document {
        Document {
            id: DocumentId::new(id),
            content_hash: format!("{id:064x}"),
            similarity_signature: SimilaritySignature::new(vec![1, 2, 3, 4]),
            raw_text: String::new(),
            normalized_text: text.to_string(),
            normalized_text_length: text.chars().count(),
            ocr_quality_score: None,
            canonical_id: DocumentId::new(canonical),
            page_count: None,
            byte_count: None,
            created_at: Utc::now(),
        }
    }

    fn signature() -> SimilaritySignature {
        SimilaritySignature::new(vec![1, 2, 3, 4])
    }

    fn scanned() -> String {
        BUDGET
            .replace("committee", "cornmittee")
            .replace("revised", "revlsed")
            .replace("deadlines", "dead1ines")
    }

    fn resolver(threshold: f64) -> DuplicateResolver {
        DuplicateResolver::new(
            &DeduplicationConfig::default().with_similarity_threshold(threshold),
        )
    }

    #[test]
    fn test_rank_keeps_best_score_per_cluster() {
        let edited = BUDGET.replace("harbor dredging", "county water");
        let candidates = vec![
            doc(1, 1, &edited),
            doc(2, 1, &scanned()),
            doc(3, 3, "quarterly inventory report for the northern warehouse"),
        ];
        let ranked = resolver(0.85).rank_clusters(BUDGET, &signature(), &candidates);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].canonical_id, DocumentId::new(1));
        assert!(ranked[0].score > 0.95);
    }

    #[test]
    fn test_rank_ties_go_to_lowest_canonical() {
        let candidates = vec![doc(9, 9, &scanned()), doc(4, 4, &scanned())];
        let ranked = resolver(0.85).rank_clusters(BUDGET, &signature(), &candidates);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].canonical_id, DocumentId::new(4));
        assert_eq!(ranked[1].canonical_id, DocumentId::new(9));
    }

    #[test]
    fn test_rank_is_order_independent() {
        let edited = BUDGET.replace("next meeting", "annual review");
        let mut candidates = vec![
            doc(5, 2, &scanned()),
            doc(2, 2, &edited),
            doc(7, 7, &edited),
        ];
        let forward = resolver(0.8).rank_clusters(BUDGET, &signature(), &candidates);
        candidates.reverse();
        assert_eq!(
            resolver(0.8).rank_clusters(BUDGET, &signature(), &candidates),
            forward
        );
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let text = scanned();
        let candidates = vec![doc(1, 1, &text)];
        let score = aligned_similarity(BUDGET, &text);
        assert_eq!(
            resolver(score).rank_clusters(BUDGET, &signature(), &candidates).len(),
            1
        );
        assert!(
            resolver(score + 1e-9)
                .rank_clusters(BUDGET, &signature(), &candidates)
                .is_empty()
        );
    }

    #[test]
    fn test_replaced_details_do_not_qualify() {
        let letter = BUDGET
            .replace("harbor dredging", "county water")
            .replace("contract deadlines", "permit fees");
        let candidates = vec![doc(1, 1, &letter)];
        assert!(
            DuplicateResolver::default()
                .rank_clusters(BUDGET, &signature(), &candidates)
                .is_empty()
        );
    }

    #[test]
    fn test_weak_signature_agreement_skips_verification() {
        let candidates = vec![doc(1, 1, BUDGET)];
        let unrelated = SimilaritySignature::new(vec![9, 9, 9, 9]);
        assert!(
            DuplicateResolver::default()
                .rank_clusters(BUDGET, &unrelated, &candidates)
                .is_empty()
        );
    }

    #[test_case(Some(95), Some(80), true ; "clear improvement")]
    #[test_case(Some(90), Some(80), false ; "exactly at margin")]
    #[test_case(Some(91), Some(80), true ; "one past margin")]
    #[test_case(Some(60), Some(80), false ; "worse")]
    #[test_case(None, Some(85), true ; "native text beats weak ocr")]
    #[test_case(Some(100), None, false ; "nothing beats native text")]
    #[test_case(None, None, false ; "both native")]
    fn test_should_promote(new: Option<u8>, canonical: Option<u8>, expected: bool) {
        assert_eq!(DuplicateResolver::default().should_promote(new, canonical), expected);
    }

    #[test]
    fn test_zero_margin_requires_strict_improvement() {
        let resolver =
            DuplicateResolver::new(&DeduplicationConfig::default().with_promotion_margin(0));
        assert!(!resolver.should_promote(Some(80), Some(80)));
        assert!(resolver.should_promote(Some(81), Some(80)));
    }
}
