//! Storage traits.
//!
//! The store knows nothing about normalization, hashing or resolution rules.
//! It persists documents, sources and edges, answers lookups, and runs a
//! caller-supplied closure inside one atomic write transaction.

use crate::Result;
use crate::models::{
    AmbiguousMatch, ArchiveParameters, Cluster, ClusterSummary, DedupStats, Document, DocumentId, DuplicateEdge,
    InvariantIssue, NewDocument, NewDuplicateEdge, RecordedSource, ScoredCluster,
    SimilaritySignature, SourceDescriptor,
};

/// Operations available inside one write transaction.
///
/// Every call made through a transaction commits together or not at all.
/// Readers never observe a partially applied ingestion.
pub trait StoreTransaction {
    /// Finds the document whose normalized text hashed to `content_hash`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn find_by_content_hash(&self, content_hash: &str) -> Result<Option<Document>>;

    /// Returns documents sharing at least one signature band with `signature`.
    ///
    /// Ordered by shared band count (descending) then id (ascending), at most
    /// `limit` documents. Uses the band index; never scans every document.
    ///
    /// # Errors
    ///
    /// Returns an error if loading the candidates fails.
    fn find_candidates_by_signature(
        &self,
        signature: &SimilaritySignature,
        limit: usize,
    ) -> Result<Vec<Document>>;

    /// Loads a document.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotFound`] if no such document exists.
    fn get_document(&self, id: DocumentId) -> Result<Document>;

    /// Inserts a document that represents its own new cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    fn insert_new_canonical(&mut self, document: NewDocument) -> Result<Document>;

    /// Inserts a document as a non-canonical member of `canonical_id`'s cluster.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotFound`] if `canonical_id` does not exist,
    /// [`crate::Error::InvalidInput`] if it is not canonical, or an error if
    /// the insert fails.
    fn attach_as_duplicate(
        &mut self,
        document: NewDocument,
        canonical_id: DocumentId,
    ) -> Result<Document>;

    /// Makes `new_canonical` the representative of `old_canonical`'s cluster,
    /// repointing every member. Returns the number of documents repointed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] if `new_canonical` is not a
    /// member of the cluster, or an error if the update fails.
    fn promote_to_canonical(
        &mut self,
        new_canonical: DocumentId,
        old_canonical: DocumentId,
    ) -> Result<usize>;

    /// Folds `absorbed`'s cluster into `into`'s: every member of `absorbed`
    /// (itself included) now points at `into`. Returns the number of
    /// documents repointed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] if the two ids are equal or
    /// either is not canonical, or an error if the update fails.
    fn merge_clusters(&mut self, absorbed: DocumentId, into: DocumentId) -> Result<usize>;

    /// Records that `source` supplied `document_id`.
    ///
    /// A repeat of the same (document, locator) pair refreshes
    /// `retrieved_at` instead of adding a row.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    fn record_source(
        &mut self,
        document_id: DocumentId,
        source: &SourceDescriptor,
    ) -> Result<RecordedSource>;

    /// Appends an audit edge.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    fn append_duplicate_edge(&mut self, edge: NewDuplicateEdge) -> Result<DuplicateEdge>;

    /// Records a near match where several clusters qualified.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    fn flag_ambiguous(
        &mut self,
        document_id: DocumentId,
        chosen: ScoredCluster,
        competitors: &[ScoredCluster],
    ) -> Result<AmbiguousMatch>;
}

/// Persistent document store.
pub trait DocumentStore: Send + Sync {
    /// Runs `work` inside one write transaction.
    ///
    /// The closure may run more than once when the store is contended, so it
    /// must not have side effects outside the transaction. On error nothing is
    /// committed.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, [`crate::Error::Contention`] if the store
    /// stayed locked through every retry, or an error if commit fails.
    fn transaction<R, F>(&self, operation: &'static str, work: F) -> Result<R>
    where
        F: FnMut(&mut dyn StoreTransaction) -> Result<R>;

    /// Fingerprinting parameters the archive was built with.
    fn parameters(&self) -> &ArchiveParameters;

    /// Loads a document.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotFound`] if no such document exists.
    fn get_document(&self, id: DocumentId) -> Result<Document>;

    /// Loads the cluster containing `id` (any member id works).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotFound`] for an unknown id and
    /// [`crate::Error::InvariantViolation`] if the cluster does not have
    /// exactly one canonical claimant.
    fn get_cluster(&self, id: DocumentId) -> Result<Cluster>;

    /// Edges where `id` is either the duplicate or the matched canonical,
    /// oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotFound`] for an unknown id.
    fn get_duplicate_history(&self, id: DocumentId) -> Result<Vec<DuplicateEdge>>;

    /// Archive-wide counters.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    fn stats(&self) -> Result<DedupStats>;

    /// Clusters with more than one member, largest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn list_clusters(&self, limit: usize) -> Result<Vec<ClusterSummary>>;

    /// Ambiguous match records, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn list_ambiguous(&self, include_resolved: bool) -> Result<Vec<AmbiguousMatch>>;

    /// Marks an ambiguous match as reviewed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotFound`] if no such record exists.
    fn resolve_ambiguous(&self, review_id: i64) -> Result<()>;

    /// Scans every cluster for single-canonical violations.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan query fails.
    fn verify_invariants(&self) -> Result<Vec<InvariantIssue>>;

    /// Rebuilds the signature band index from stored signatures. Returns the
    /// number of documents indexed.
    ///
    /// # Errors
    ///
    /// Returns an error if reading signatures fails.
    fn rebuild_index(&self) -> Result<usize>;
}
