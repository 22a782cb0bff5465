//! Canonicalization driver.
//!
//! Runs one document through the pipeline:
//!
//! ```text
//! normalize ─► fingerprint ─► assess quality      (no lock held)
//!                   │
//!                   ▼
//!   ┌──────────── one IMMEDIATE transaction ─────────────┐
//!   │ resolve ─► merge bridged clusters ─► insert/attach │
//!   │ ─► record source ─► append edges ─► flag ─► promote │
//!   └────────────────────────────────────────────────────┘
//! ```
//!
//! A near duplicate joins every cluster it qualifies for. When it qualifies
//! for several, they are merged into the one whose canonical has the best
//! quality, so clusters are the connected components of the verified
//! similarity graph however the documents were ordered.

use crate::config::DocanonConfig;
use crate::models::{
    Document, DocumentId, IngestRequest, MatchType, NewDocument, NewDuplicateEdge, ScoredCluster,
    SourceDescriptor,
};
use crate::services::deduplication::{
    ContentHasher, Decision, DuplicateResolver, Fingerprint, Fingerprinter, QualityAssessor,
    Resolution,
};
use crate::services::normalize::Normalizer;
use crate::storage::{DocumentStore, SqliteDocumentStore, StoreTransaction};
use crate::{Error, Result};
use serde::Serialize;
use std::time::Instant;
use uuid::Uuid;

/// What happened to one ingested document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    /// Correlation id of this ingestion (`UUIDv7`).
    pub ingest_id: Uuid,
    /// The document now holding this content. For exact duplicates this is
    /// the previously archived copy.
    pub document_id: DocumentId,
    /// Canonical of the document's cluster after the ingestion.
    pub canonical_id: DocumentId,
    /// The resolver's decision.
    pub decision: Decision,
    /// Whether the new document took over as canonical.
    pub promoted: bool,
    /// The provenance row for this copy.
    pub source_id: i64,
    /// False when the same origin had already supplied this document.
    pub source_created: bool,
    /// Review queue record, when several clusters qualified.
    pub review_id: Option<i64>,
    /// Former canonicals whose clusters were merged into this one.
    pub merged: Vec<DocumentId>,
    /// Quality of the incoming text, `None` for native text.
    pub ocr_quality_score: Option<u8>,
    /// Candidate documents the resolver scored.
    pub candidates_scored: usize,
}

/// Ingests documents into a [`DocumentStore`].
///
/// Safe to share across threads; every ingestion is applied atomically.
///
/// # Example
///
/// ```rust
/// use docanon::storage::{SqliteDocumentStore, SqliteStoreOptions};
/// use docanon::{CanonicalizationService, DocanonConfig, IngestRequest, SourceDescriptor};
///
/// let store = SqliteDocumentStore::in_memory(&SqliteStoreOptions::default())?;
/// let service = CanonicalizationService::new(store, &DocanonConfig::default())?;
///
/// let text = "Memorandum for the record regarding travel arrangements for the delegation";
/// let first = service.ingest(IngestRequest::new(text, SourceDescriptor::new("a", "a/1.pdf")))?;
/// let second = service.ingest(IngestRequest::new(text, SourceDescriptor::new("b", "b/7.pdf")))?;
///
/// assert_eq!(first.document_id, second.document_id);
/// assert_eq!(second.decision.label(), "exact");
/// # Ok::<(), docanon::Error>(())
/// ```
pub struct CanonicalizationService<S: DocumentStore = SqliteDocumentStore> {
    store: S,
    normalizer: Normalizer,
    fingerprinter: Fingerprinter,
    quality: QualityAssessor,
    resolver: DuplicateResolver,
}

impl CanonicalizationService<SqliteDocumentStore> {
    /// Opens the configured database and builds a service over it.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the store cannot
    /// be opened.
    pub fn open(config: &DocanonConfig) -> Result<Self> {
        config.validate()?;
        let store = SqliteDocumentStore::open(&config.storage.db_path, &config.store_options())?;
        Self::new(store, config)
    }

    /// Like [`Self::open`], but the database file must already exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the configuration is invalid or
    /// does not match the archive, and [`Error::OperationFailed`] if the
    /// file is missing or cannot be opened.
    pub fn open_existing(config: &DocanonConfig) -> Result<Self> {
        config.validate()?;
        let store =
            SqliteDocumentStore::open_existing(&config.storage.db_path, &config.store_options())?;
        Self::new(store, config)
    }
}

impl<S: DocumentStore> CanonicalizationService<S> {
    /// Creates a service over an existing store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the dedup or normalization
    /// settings are invalid, or if the store was built with different
    /// fingerprinting parameters.
    pub fn new(store: S, config: &DocanonConfig) -> Result<Self> {
        config.dedup.validate()?;
        store.parameters().ensure_matches(&config.archive_parameters())?;
        Ok(Self {
            store,
            normalizer: Normalizer::from_config(&config.normalize)?,
            fingerprinter: Fingerprinter::from_config(&config.dedup),
            quality: QualityAssessor::new(),
            resolver: DuplicateResolver::new(&config.dedup),
        })
    }

    /// The underlying store, for queries.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Ingests one document.
    ///
    /// Normalization, fingerprinting and quality scoring happen before the
    /// store is locked. Resolution and every resulting write then happen in a
    /// single transaction, so concurrent ingestions of overlapping content
    /// are linearized.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Contention`] if the store stayed locked through
    /// every retry, or an error if a store operation fails. Nothing is
    /// written on error.
    pub fn ingest(&self, request: IngestRequest) -> Result<IngestOutcome> {
        let ingest_id = Uuid::now_v7();
        let span = tracing::info_span!(
            "ingest",
            %ingest_id,
            origin = %request.source.origin_name,
            locator = %request.source.origin_locator,
        );
        let _entered = span.enter();
        let start = Instant::now();

        let normalized = self.normalizer.normalize(&request.raw_text);
        let fingerprint = self.fingerprinter.fingerprint(&normalized);
        let ocr_quality_score = request.ocr.then(|| self.quality.assess(&request.raw_text));
        tracing::debug!(
            content_hash = ContentHasher::short(&fingerprint.content_hash),
            normalized_length = normalized.chars().count(),
            ocr_quality_score,
            "fingerprinted"
        );

        let new_document = NewDocument {
            content_hash: fingerprint.content_hash.clone(),
            similarity_signature: fingerprint.signature.clone(),
            normalized_text: normalized.clone(),
            normalized_text_length: normalized.chars().count(),
            raw_text: request.raw_text,
            ocr_quality_score,
            page_count: request.page_count,
            byte_count: request.byte_count,
        };

        let result = self.store.transaction("ingest", |tx| {
            self.apply(tx, &normalized, &fingerprint, &new_document, &request.source)
        });

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        match result {
            Ok(applied) => {
                let outcome = applied.into_outcome(ingest_id, ocr_quality_score);
                record_metrics(&outcome, elapsed_ms);
                tracing::info!(
                    decision = outcome.decision.label(),
                    document_id = outcome.document_id.get(),
                    canonical_id = outcome.canonical_id.get(),
                    promoted = outcome.promoted,
                    merged = outcome.merged.len(),
                    elapsed_ms,
                    "ingested document"
                );
                Ok(outcome)
            },
            Err(e) => {
                metrics::counter!("docanon_ingest_failures_total").increment(1);
                tracing::warn!(error = %e, retryable = e.is_retryable(), "ingestion failed");
                Err(e)
            },
        }
    }

    /// Resolves and applies one fingerprint inside an open transaction.
    ///
    /// May run more than once if the store is contended.
    fn apply(
        &self,
        tx: &mut dyn StoreTransaction,
        normalized: &str,
        fingerprint: &Fingerprint,
        new_document: &NewDocument,
        source: &SourceDescriptor,
    ) -> Result<Applied> {
        let resolution = self.resolver.resolve(&*tx, normalized, fingerprint)?;
        let Resolution {
            decision,
            competitors,
            candidates_scored,
        } = resolution;

        match decision {
            Decision::NewCanonical => {
                let document = tx.insert_new_canonical(new_document.clone())?;
                let recorded = tx.record_source(document.id, source)?;
                Ok(Applied {
                    decision,
                    document_id: document.id,
                    canonical_id: document.id,
                    promoted: false,
                    source_id: recorded.source.id,
                    source_created: recorded.created,
                    review_id: None,
                    merged: Vec::new(),
                    candidates_scored,
                })
            },
            Decision::ExactDuplicateOf {
                canonical_id,
                matched_document_id,
            } => {
                let recorded = tx.record_source(matched_document_id, source)?;
                if recorded.created {
                    tx.append_duplicate_edge(NewDuplicateEdge {
                        document_id: matched_document_id,
                        matched_canonical_id: canonical_id,
                        similarity_score: 1.0,
                        match_type: MatchType::Exact,
                        source_id: Some(recorded.source.id),
                    })?;
                }
                Ok(Applied {
                    decision,
                    document_id: matched_document_id,
                    canonical_id,
                    promoted: false,
                    source_id: recorded.source.id,
                    source_created: recorded.created,
                    review_id: None,
                    merged: Vec::new(),
                    candidates_scored,
                })
            },
            Decision::NearDuplicateOf {
                canonical_id,
                score,
            } => {
                let best = ScoredCluster {
                    canonical_id,
                    score,
                };
                let qualifying: Vec<ScoredCluster> =
                    std::iter::once(best).chain(competitors.iter().copied()).collect();
                let (survivor, merged) = merge_bridged(tx, &qualifying)?;

                let document = tx.attach_as_duplicate(new_document.clone(), survivor.id)?;
                let recorded = tx.record_source(document.id, source)?;
                for cluster in &qualifying {
                    tx.append_duplicate_edge(NewDuplicateEdge {
                        document_id: document.id,
                        matched_canonical_id: cluster.canonical_id,
                        similarity_score: cluster.score,
                        match_type: MatchType::Near,
                        source_id: Some(recorded.source.id),
                    })?;
                }

                let review_id = if competitors.is_empty() {
                    None
                } else {
                    let competing: Vec<i64> =
                        competitors.iter().map(|c| c.canonical_id.get()).collect();
                    tracing::warn!(
                        document_id = document.id.get(),
                        chosen = canonical_id.get(),
                        score,
                        competitors = ?competing,
                        survivor = survivor.id.get(),
                        "near match bridges several clusters, merged them"
                    );
                    let review = tx.flag_ambiguous(document.id, best, &competitors)?;
                    Some(review.id)
                };

                let promoted = self
                    .resolver
                    .should_promote(document.ocr_quality_score, survivor.ocr_quality_score);
                if promoted {
                    let repointed = tx.promote_to_canonical(document.id, survivor.id)?;
                    tracing::info!(
                        old_canonical = survivor.id.get(),
                        new_canonical = document.id.get(),
                        old_quality = survivor.effective_quality(),
                        new_quality = document.effective_quality(),
                        repointed,
                        "promoted higher-quality copy to canonical"
                    );
                }

                Ok(Applied {
                    decision,
                    document_id: document.id,
                    canonical_id: if promoted { document.id } else { survivor.id },
                    promoted,
                    source_id: recorded.source.id,
                    source_created: recorded.created,
                    review_id,
                    merged,
                    candidates_scored,
                })
            },
        }
    }
}

/// Merges every qualifying cluster into the one whose canonical has the
/// highest effective quality, ties going to the lowest id. Returns that
/// canonical and the canonicals that were folded into it.
fn merge_bridged(
    tx: &mut dyn StoreTransaction,
    qualifying: &[ScoredCluster],
) -> Result<(Document, Vec<DocumentId>)> {
    let canonicals = qualifying
        .iter()
        .map(|cluster| tx.get_document(cluster.canonical_id))
        .collect::<Result<Vec<_>>>()?;
    let survivor = canonicals
        .iter()
        .max_by(|a, b| {
            a.effective_quality()
                .cmp(&b.effective_quality())
                .then_with(|| b.id.cmp(&a.id))
        })
        .cloned()
        .ok_or_else(|| Error::InvalidInput("near match without a cluster".to_string()))?;

    let mut merged = Vec::new();
    for absorbed in canonicals.iter().filter(|c| c.id != survivor.id) {
        let repointed = tx.merge_clusters(absorbed.id, survivor.id)?;
        tracing::info!(
            absorbed = absorbed.id.get(),
            into = survivor.id.get(),
            repointed,
            "merged bridged cluster"
        );
        merged.push(absorbed.id);
    }
    merged.sort_unstable();
    Ok((survivor, merged))
}

/// Result of the transactional part of an ingestion.
struct Applied {
    decision: Decision,
    document_id: DocumentId,
    canonical_id: DocumentId,
    promoted: bool,
    source_id: i64,
    source_created: bool,
    review_id: Option<i64>,
    merged: Vec<DocumentId>,
    candidates_scored: usize,
}

impl Applied {
    fn into_outcome(self, ingest_id: Uuid, ocr_quality_score: Option<u8>) -> IngestOutcome {
        IngestOutcome {
            ingest_id,
            document_id: self.document_id,
            canonical_id: self.canonical_id,
            decision: self.decision,
            promoted: self.promoted,
            source_id: self.source_id,
            source_created: self.source_created,
            review_id: self.review_id,
            merged: self.merged,
            ocr_quality_score,
            candidates_scored: self.candidates_scored,
        }
    }
}

fn record_metrics(outcome: &IngestOutcome, elapsed_ms: f64) {
    metrics::counter!(
        "docanon_ingest_total",
        "decision" => outcome.decision.label()
    )
    .increment(1);
    metrics::histogram!("docanon_ingest_duration_ms").record(elapsed_ms);
    if outcome.promoted {
        metrics::counter!("docanon_promotions_total").increment(1);
    }
    if outcome.review_id.is_some() {
        metrics::counter!("docanon_ambiguous_matches_total").increment(1);
    }
    if !outcome.merged.is_empty() {
        metrics::counter!("docanon_cluster_merges_total")
            .increment(u64::try_from(outcome.merged.len()).unwrap_or(u64::MAX));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::deduplication::DeduplicationConfig;
    use crate::storage::SqliteStoreOptions;
    use crate::Error;

    const MEMO: &str = "Memorandum for the record. Subject: travel arrangements for the \
        regional delegation. The delegation will depart on the fourth of March and \
        return after the budget hearings have concluded. All receipts must be filed \
        with the finance office within ten days of return.";

    fn service(config: &DocanonConfig) -> CanonicalizationService {
        let store = SqliteDocumentStore::in_memory(&config.store_options()).unwrap();
        CanonicalizationService::new(store, config).unwrap()
    }

    fn request(text: &str, locator: &str) -> IngestRequest {
        IngestRequest::new(text, SourceDescriptor::new("test-release", locator))
    }

    #[test]
    fn test_first_ingest_is_new_canonical() {
        let service = service(&DocanonConfig::default());
        let outcome = service.ingest(request(MEMO, "a.pdf")).unwrap();
        assert_eq!(outcome.decision, Decision::NewCanonical);
        assert_eq!(outcome.document_id, outcome.canonical_id);
        assert!(outcome.source_created);
        assert!(outcome.ocr_quality_score.is_some());
        assert_eq!(outcome.ingest_id.get_version_num(), 7);
    }

    #[test]
    fn test_exact_duplicate_records_source_and_edge_once() {
        let service = service(&DocanonConfig::default());
        let first = service.ingest(request(MEMO, "a.pdf")).unwrap();
        let reformatted = MEMO.to_uppercase().replace(". ", ".\n\n");
        let second = service.ingest(request(&reformatted, "b.pdf")).unwrap();
        let repeat = service.ingest(request(&reformatted, "b.pdf")).unwrap();

        assert_eq!(second.decision.label(), "exact");
        assert_eq!(second.document_id, first.document_id);
        assert!(second.source_created);
        assert!(!repeat.source_created);
        assert_eq!(repeat.source_id, second.source_id);

        let stats = service.store().stats().unwrap();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.sources, 2);
        assert_eq!(stats.exact_edges, 1);
        assert_eq!(stats.near_edges, 0);
    }

    #[test]
    fn test_native_text_has_no_quality() {
        let service = service(&DocanonConfig::default());
        let outcome = service
            .ingest(request(MEMO, "a.txt").with_ocr(false))
            .unwrap();
        assert_eq!(outcome.ocr_quality_score, None);
        let document = service.store().get_document(outcome.document_id).unwrap();
        assert_eq!(document.ocr_quality_score, None);
        assert_eq!(document.effective_quality(), 100);
    }

    #[test]
    fn test_empty_text_is_its_own_cluster() {
        let service = service(&DocanonConfig::default());
        let blank = service.ingest(request("  \n\t ", "blank.pdf")).unwrap();
        let memo = service.ingest(request(MEMO, "memo.pdf")).unwrap();
        assert_eq!(blank.decision, Decision::NewCanonical);
        assert_eq!(blank.ocr_quality_score, Some(0));
        assert_ne!(blank.canonical_id, memo.canonical_id);

        let again = service.ingest(request("", "empty.pdf")).unwrap();
        assert_eq!(again.document_id, blank.document_id);
    }

    #[test]
    fn test_invalid_dedup_config_rejected() {
        let config = DocanonConfig::default()
            .with_dedup(DeduplicationConfig::default().with_signature(100, 32));
        let store = SqliteDocumentStore::in_memory(&SqliteStoreOptions::default()).unwrap();
        assert!(matches!(
            CanonicalizationService::new(store, &config),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_store_built_with_other_parameters_rejected() {
        let store = SqliteDocumentStore::in_memory(&SqliteStoreOptions::default()).unwrap();
        let config = DocanonConfig::default()
            .with_dedup(DeduplicationConfig::default().with_shingle_size(5));
        let Err(Error::InvalidInput(message)) = CanonicalizationService::new(store, &config) else {
            panic!("expected a parameter mismatch");
        };
        assert!(message.contains("shingle_size"));
    }
}
