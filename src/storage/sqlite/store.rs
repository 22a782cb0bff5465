//! `SQLite` document store.

use super::connection::{
    DEFAULT_BUSY_TIMEOUT, acquire_lock, configure_connection, open_existing_file, open_file,
};
use super::metrics::{record_operation_metrics, status_of};
use super::schema;
use crate::models::{
    AmbiguousMatch, ArchiveParameters, Cluster, ClusterSummary, DedupStats, Document, DocumentId, DuplicateEdge,
    InvariantIssue, MatchType, NewDocument, NewDuplicateEdge, RecordedSource, ScoredCluster,
    SimilaritySignature, Source, SourceDescriptor,
};
use crate::storage::index::SignatureIndex;
use crate::storage::resilience::{RetryPolicy, sql_error};
use crate::storage::traits::{DocumentStore, StoreTransaction};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};
use tracing::instrument;

const DOCUMENT_COLUMNS: &str = "document_id, content_hash, similarity_signature, raw_text, \
     normalized_text, normalized_text_length, ocr_quality_score, canonical_id, page_count, \
     byte_count, created_at";

const SOURCE_COLUMNS: &str = "source_id, document_id, origin_name, origin_locator, retrieved_at";

const EDGE_COLUMNS: &str = "edge_id, document_id, matched_canonical_id, similarity_score, \
     match_type, source_id, decided_at";

const AMBIGUOUS_COLUMNS: &str =
    "review_id, document_id, chosen_canonical_id, chosen_score, competitors, flagged_at, resolved";

/// Options for opening a [`SqliteDocumentStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteStoreOptions {
    /// How long `SQLite` waits on another process's lock.
    pub busy_timeout: Duration,
    /// Retry policy for contended writes.
    pub retry: RetryPolicy,
    /// Fingerprinting parameters the archive must have been built with.
    pub parameters: ArchiveParameters,
}

impl Default for SqliteStoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            retry: RetryPolicy::default(),
            parameters: ArchiveParameters::default(),
        }
    }
}

/// Document store backed by a single `SQLite` database.
///
/// # Concurrency
///
/// One connection behind a mutex. Every write runs in a `BEGIN IMMEDIATE`
/// transaction, so concurrent ingestions (threads or processes) are applied
/// one at a time and a merge or promotion is never interleaved with another.
///
/// Document ids only grow, so documents committed by other processes are
/// picked up at the start of each write transaction by indexing every id
/// above the highest one already indexed.
///
/// # Parameters
///
/// The first open records [`ArchiveParameters`] in the database. Later opens
/// with different shingle, signature, band or normalizer settings fail with
/// [`Error::InvalidInput`].
///
/// # Example
///
/// ```rust
/// use docanon::storage::{DocumentStore, SqliteDocumentStore, SqliteStoreOptions};
///
/// let store = SqliteDocumentStore::in_memory(&SqliteStoreOptions::default())?;
/// assert_eq!(store.stats()?.documents, 0);
/// # Ok::<(), docanon::Error>(())
/// ```
pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
    index: SignatureIndex,
    indexed_through: AtomicI64,
    retry: RetryPolicy,
    parameters: ArchiveParameters,
    db_path: Option<PathBuf>,
}

impl SqliteDocumentStore {
    /// Opens (or creates) a database file, migrates it and builds the band
    /// index.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, configured or migrated.
    #[instrument(skip(options), fields(operation = "open_store"))]
    pub fn open(path: &Path, options: &SqliteStoreOptions) -> Result<Self> {
        let conn = open_file(path)?;
        Self::from_connection(conn, options, Some(path.to_path_buf()))
    }

    /// Opens a database file that must already exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the file is missing or cannot be
    /// opened, [`Error::InvalidInput`] if it was built with other parameters.
    #[instrument(skip(options), fields(operation = "open_store"))]
    pub fn open_existing(path: &Path, options: &SqliteStoreOptions) -> Result<Self> {
        let conn = open_existing_file(path)?;
        Self::from_connection(conn, options, Some(path.to_path_buf()))
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created or migrated.
    pub fn in_memory(options: &SqliteStoreOptions) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| sql_error("open_in_memory", &e))?;
        Self::from_connection(conn, options, None)
    }

    fn from_connection(
        mut conn: Connection,
        options: &SqliteStoreOptions,
        db_path: Option<PathBuf>,
    ) -> Result<Self> {
        configure_connection(&conn, options.busy_timeout)?;
        let applied = schema::migrate(&mut conn)?;
        reconcile_parameters(&mut conn, &options.parameters)?;
        let store = Self {
            conn: Mutex::new(conn),
            index: SignatureIndex::new(options.parameters.bands),
            indexed_through: AtomicI64::new(0),
            retry: options.retry,
            parameters: options.parameters.clone(),
            db_path,
        };
        let indexed = store.rebuild_index()?;
        tracing::debug!(
            migrations_applied = applied,
            documents_indexed = indexed,
            "store opened"
        );
        Ok(store)
    }

    /// Path of the database file, `None` for in-memory stores.
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// The band index.
    #[must_use]
    pub const fn index(&self) -> &SignatureIndex {
        &self.index
    }

    /// Indexes documents committed by other connections since the last
    /// transaction. Must run with the write lock held.
    fn catch_up_index(&self, conn: &Connection) -> Result<usize> {
        let through = self.indexed_through.load(Ordering::Acquire);
        let entries = load_signatures(conn, through)?;
        if let Some((last, _)) = entries.last() {
            self.indexed_through.fetch_max(last.get(), Ordering::AcqRel);
        }
        for (id, signature) in &entries {
            self.index.insert(*id, signature);
        }
        if !entries.is_empty() {
            tracing::debug!(
                documents = entries.len(),
                "indexed documents written by another connection"
            );
        }
        Ok(entries.len())
    }

    fn read<T, F>(&self, operation: &'static str, query: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let start = Instant::now();
        let result = {
            let conn = acquire_lock(&self.conn);
            query(&conn)
        };
        record_operation_metrics(operation, start, status_of(&result));
        result
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn transaction<R, F>(&self, operation: &'static str, mut work: F) -> Result<R>
    where
        F: FnMut(&mut dyn StoreTransaction) -> Result<R>,
    {
        let start = Instant::now();
        let result = self.retry.run(operation, || {
            let mut conn = acquire_lock(&self.conn);
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| sql_error(operation, &e))?;
            self.catch_up_index(&tx)?;
            let mut handle = SqliteTransaction::new(&tx, &self.index);
            let value = work(&mut handle)?;
            let pending = handle.pending;
            tx.commit().map_err(|e| sql_error(operation, &e))?;
            for (id, keys) in pending {
                self.index.insert_keys(id, &keys);
                self.indexed_through.fetch_max(id.get(), Ordering::AcqRel);
            }
            Ok(value)
        });
        record_operation_metrics(operation, start, status_of(&result));
        result
    }

    fn parameters(&self) -> &ArchiveParameters {
        &self.parameters
    }

    fn get_document(&self, id: DocumentId) -> Result<Document> {
        self.read("get_document", |conn| load_document(conn, id))
    }

    #[instrument(skip(self), fields(operation = "get_cluster", document_id = %id))]
    fn get_cluster(&self, id: DocumentId) -> Result<Cluster> {
        self.read("get_cluster", |conn| {
            let document = load_document(conn, id)?;
            let cluster_id = document.canonical_id;

            let members = query_documents(
                conn,
                "get_cluster",
                &format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE canonical_id = ?1 \
                     ORDER BY document_id"
                ),
                params![cluster_id.get()],
            )?;
            let claimants = members.iter().filter(|d| d.is_canonical()).count();
            let Some(canonical) = members.iter().find(|d| d.is_canonical()).cloned() else {
                return Err(invariant_violation(
                    cluster_id,
                    format!(
                        "no member of cluster #{cluster_id} claims canonical status \
                         ({} members)",
                        members.len()
                    ),
                ));
            };
            if claimants > 1 {
                return Err(invariant_violation(
                    cluster_id,
                    format!("{claimants} members claim canonical status"),
                ));
            }

            let mut stmt = conn
                .prepare_cached(
                    "SELECT s.source_id, s.document_id, s.origin_name, s.origin_locator, \
                     s.retrieved_at FROM sources s \
                     JOIN documents d ON d.document_id = s.document_id \
                     WHERE d.canonical_id = ?1 ORDER BY s.source_id",
                )
                .map_err(|e| sql_error("get_cluster", &e))?;
            let sources = stmt
                .query_map(params![cluster_id.get()], source_from_row)
                .and_then(Iterator::collect::<rusqlite::Result<Vec<_>>>)
                .map_err(|e| sql_error("get_cluster", &e))?;

            Ok(Cluster {
                canonical,
                member_ids: members.iter().map(|d| d.id).collect(),
                sources,
            })
        })
    }

    fn get_duplicate_history(&self, id: DocumentId) -> Result<Vec<DuplicateEdge>> {
        self.read("get_duplicate_history", |conn| {
            load_document(conn, id)?;
            let mut stmt = conn
                .prepare_cached(&format!(
                    "SELECT {EDGE_COLUMNS} FROM duplicate_edges \
                     WHERE document_id = ?1 OR matched_canonical_id = ?1 ORDER BY edge_id"
                ))
                .map_err(|e| sql_error("get_duplicate_history", &e))?;
            stmt.query_map(params![id.get()], edge_from_row)
                .and_then(Iterator::collect)
                .map_err(|e| sql_error("get_duplicate_history", &e))
        })
    }

    fn stats(&self) -> Result<DedupStats> {
        self.read("stats", |conn| {
            let count = |sql: &str| -> Result<usize> {
                conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                    .map(|n| usize::try_from(n).unwrap_or(0))
                    .map_err(|e| sql_error("stats", &e))
            };
            Ok(DedupStats {
                documents: count("SELECT COUNT(*) FROM documents")?,
                clusters: count("SELECT COUNT(*) FROM documents WHERE canonical_id = document_id")?,
                multi_member_clusters: count(
                    "SELECT COUNT(*) FROM (SELECT canonical_id FROM documents \
                     GROUP BY canonical_id HAVING COUNT(*) > 1)",
                )?,
                sources: count("SELECT COUNT(*) FROM sources")?,
                duplicate_edges: count("SELECT COUNT(*) FROM duplicate_edges")?,
                exact_edges: count(
                    "SELECT COUNT(*) FROM duplicate_edges WHERE match_type = 'exact'",
                )?,
                near_edges: count("SELECT COUNT(*) FROM duplicate_edges WHERE match_type = 'near'")?,
                ambiguous_matches: count("SELECT COUNT(*) FROM ambiguous_matches")?,
            })
        })
    }

    fn list_clusters(&self, limit: usize) -> Result<Vec<ClusterSummary>> {
        self.read("list_clusters", |conn| {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT d.canonical_id, COUNT(*) AS members, \
                     (SELECT COUNT(*) FROM sources s \
                        JOIN documents m ON m.document_id = s.document_id \
                        WHERE m.canonical_id = d.canonical_id), \
                     (SELECT c.ocr_quality_score FROM documents c \
                        WHERE c.document_id = d.canonical_id) \
                     FROM documents d GROUP BY d.canonical_id HAVING COUNT(*) > 1 \
                     ORDER BY members DESC, d.canonical_id ASC LIMIT ?1",
                )
                .map_err(|e| sql_error("list_clusters", &e))?;
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            stmt.query_map(params![limit], |row| {
                let members: i64 = row.get(1)?;
                let sources: i64 = row.get(2)?;
                let quality: Option<i64> = row.get(3)?;
                Ok(ClusterSummary {
                    canonical_id: DocumentId::new(row.get(0)?),
                    member_count: usize::try_from(members).unwrap_or(0),
                    source_count: usize::try_from(sources).unwrap_or(0),
                    canonical_quality: quality.and_then(|q| u8::try_from(q).ok()),
                })
            })
            .and_then(Iterator::collect)
            .map_err(|e| sql_error("list_clusters", &e))
        })
    }

    fn list_ambiguous(&self, include_resolved: bool) -> Result<Vec<AmbiguousMatch>> {
        self.read("list_ambiguous", |conn| {
            let mut stmt = conn
                .prepare_cached(&format!(
                    "SELECT {AMBIGUOUS_COLUMNS} FROM ambiguous_matches \
                     WHERE resolved = 0 OR ?1 ORDER BY review_id"
                ))
                .map_err(|e| sql_error("list_ambiguous", &e))?;
            stmt.query_map(params![include_resolved], ambiguous_from_row)
                .and_then(Iterator::collect)
                .map_err(|e| sql_error("list_ambiguous", &e))
        })
    }

    fn resolve_ambiguous(&self, review_id: i64) -> Result<()> {
        self.retry.run("resolve_ambiguous", || {
            self.read("resolve_ambiguous", |conn| {
                let updated = conn
                    .execute(
                        "UPDATE ambiguous_matches SET resolved = 1 WHERE review_id = ?1",
                        params![review_id],
                    )
                    .map_err(|e| sql_error("resolve_ambiguous", &e))?;
                if updated == 0 {
                    return Err(Error::NotFound(format!("review #{review_id}")));
                }
                Ok(())
            })
        })
    }

    #[instrument(skip(self), fields(operation = "verify_invariants"))]
    fn verify_invariants(&self) -> Result<Vec<InvariantIssue>> {
        let issues = self.read("verify_invariants", |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT DISTINCT d.canonical_id, c.document_id, c.canonical_id \
                     FROM documents d \
                     LEFT JOIN documents c ON c.document_id = d.canonical_id \
                     WHERE c.document_id IS NULL OR c.canonical_id != c.document_id \
                     ORDER BY d.canonical_id",
                )
                .map_err(|e| sql_error("verify_invariants", &e))?;
            stmt.query_map([], |row| {
                let cluster = DocumentId::new(row.get(0)?);
                let found: Option<i64> = row.get(1)?;
                let points_to: Option<i64> = row.get(2)?;
                let detail = match (found, points_to) {
                    (None, _) => format!("canonical document #{cluster} does not exist"),
                    (Some(_), Some(other)) => {
                        format!("canonical document #{cluster} belongs to cluster #{other}")
                    },
                    (Some(_), None) => format!("canonical document #{cluster} has no cluster"),
                };
                Ok(InvariantIssue {
                    canonical_id: cluster,
                    detail,
                })
            })
            .and_then(Iterator::collect::<rusqlite::Result<Vec<_>>>)
            .map_err(|e| sql_error("verify_invariants", &e))
        })?;

        for issue in &issues {
            tracing::error!(
                canonical_id = issue.canonical_id.get(),
                detail = %issue.detail,
                "cluster invariant violated"
            );
        }
        Ok(issues)
    }

    #[instrument(skip(self), fields(operation = "rebuild_index"))]
    fn rebuild_index(&self) -> Result<usize> {
        let entries = self.read("rebuild_index", |conn| load_signatures(conn, 0))?;
        let through = entries.last().map_or(0, |(id, _)| id.get());
        let count = self.index.replace_all(entries);
        self.indexed_through.store(through, Ordering::Release);
        tracing::debug!(documents = count, buckets = self.index.bucket_count(), "band index rebuilt");
        Ok(count)
    }
}

/// Write handle for one open `SQLite` transaction.
///
/// Band keys of inserted documents are buffered in `pending` and reach the
/// shared index only after commit.
struct SqliteTransaction<'a> {
    conn: &'a Connection,
    index: &'a SignatureIndex,
    pending: Vec<(DocumentId, Vec<u64>)>,
}

impl<'a> SqliteTransaction<'a> {
    const fn new(conn: &'a Connection, index: &'a SignatureIndex) -> Self {
        Self {
            conn,
            index,
            pending: Vec::new(),
        }
    }

    fn insert(&mut self, document: &NewDocument, canonical_id: Option<DocumentId>) -> Result<Document> {
        let length = i64::try_from(document.normalized_text_length).unwrap_or(i64::MAX);
        let byte_count = document
            .byte_count
            .map(|b| i64::try_from(b).unwrap_or(i64::MAX));
        self.conn
            .execute(
                "INSERT INTO documents (content_hash, similarity_signature, raw_text, \
                 normalized_text, normalized_text_length, ocr_quality_score, canonical_id, \
                 page_count, byte_count, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    document.content_hash,
                    document.similarity_signature.to_bytes(),
                    document.raw_text,
                    document.normalized_text,
                    length,
                    document.ocr_quality_score.map(i64::from),
                    canonical_id.map_or(0, DocumentId::get),
                    document.page_count.map(i64::from),
                    byte_count,
                    Utc::now().timestamp_millis(),
                ],
            )
            .map_err(|e| sql_error("insert_document", &e))?;
        let id = DocumentId::new(self.conn.last_insert_rowid());

        if canonical_id.is_none() {
            self.conn
                .execute(
                    "UPDATE documents SET canonical_id = document_id WHERE document_id = ?1",
                    params![id.get()],
                )
                .map_err(|e| sql_error("insert_document", &e))?;
        }

        self.pending
            .push((id, self.index.keys_for(&document.similarity_signature)));
        load_document(self.conn, id)
    }
}

impl StoreTransaction for SqliteTransaction<'_> {
    fn find_by_content_hash(&self, content_hash: &str) -> Result<Option<Document>> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE content_hash = ?1"
            ))
            .map_err(|e| sql_error("find_by_content_hash", &e))?;
        stmt.query_row(params![content_hash], document_from_row)
            .optional()
            .map_err(|e| sql_error("find_by_content_hash", &e))
    }

    fn find_candidates_by_signature(
        &self,
        signature: &SimilaritySignature,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let ids = self.index.candidates(signature, limit);
        let mut documents = Vec::with_capacity(ids.len());
        for id in ids {
            match load_document(self.conn, id) {
                Ok(document) => documents.push(document),
                Err(Error::NotFound(_)) => {
                    tracing::warn!(document_id = id.get(), "band index entry without a document");
                },
                Err(e) => return Err(e),
            }
        }
        Ok(documents)
    }

    fn get_document(&self, id: DocumentId) -> Result<Document> {
        load_document(self.conn, id)
    }

    fn insert_new_canonical(&mut self, document: NewDocument) -> Result<Document> {
        self.insert(&document, None)
    }

    fn attach_as_duplicate(
        &mut self,
        document: NewDocument,
        canonical_id: DocumentId,
    ) -> Result<Document> {
        let canonical = load_document(self.conn, canonical_id)?;
        if !canonical.is_canonical() {
            return Err(Error::InvalidInput(format!(
                "document #{canonical_id} is not canonical (cluster #{})",
                canonical.canonical_id
            )));
        }
        self.insert(&document, Some(canonical_id))
    }

    fn promote_to_canonical(
        &mut self,
        new_canonical: DocumentId,
        old_canonical: DocumentId,
    ) -> Result<usize> {
        let newcomer = load_document(self.conn, new_canonical)?;
        if newcomer.canonical_id != old_canonical {
            return Err(Error::InvalidInput(format!(
                "document #{new_canonical} is not a member of cluster #{old_canonical}"
            )));
        }
        let current = load_document(self.conn, old_canonical)?;
        if !current.is_canonical() {
            return Err(Error::InvalidInput(format!(
                "document #{old_canonical} is not canonical"
            )));
        }
        self.conn
            .execute(
                "UPDATE documents SET canonical_id = ?1 WHERE canonical_id = ?2",
                params![new_canonical.get(), old_canonical.get()],
            )
            .map_err(|e| sql_error("promote_to_canonical", &e))
    }

    fn merge_clusters(&mut self, absorbed: DocumentId, into: DocumentId) -> Result<usize> {
        if absorbed == into {
            return Err(Error::InvalidInput(format!(
                "cannot merge cluster #{into} into itself"
            )));
        }
        for id in [absorbed, into] {
            if !load_document(self.conn, id)?.is_canonical() {
                return Err(Error::InvalidInput(format!("document #{id} is not canonical")));
            }
        }
        self.conn
            .execute(
                "UPDATE documents SET canonical_id = ?1 WHERE canonical_id = ?2",
                params![into.get(), absorbed.get()],
            )
            .map_err(|e| sql_error("merge_clusters", &e))
    }

    fn record_source(
        &mut self,
        document_id: DocumentId,
        source: &SourceDescriptor,
    ) -> Result<RecordedSource> {
        let retrieved_at = source.retrieved_at.timestamp_millis();
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT source_id FROM sources WHERE document_id = ?1 AND origin_locator = ?2",
                params![document_id.get(), source.origin_locator],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| sql_error("record_source", &e))?;

        let (source_id, created) = if let Some(source_id) = existing {
            self.conn
                .execute(
                    "UPDATE sources SET retrieved_at = ?1, origin_name = ?2 WHERE source_id = ?3",
                    params![retrieved_at, source.origin_name, source_id],
                )
                .map_err(|e| sql_error("record_source", &e))?;
            (source_id, false)
        } else {
            self.conn
                .execute(
                    "INSERT INTO sources (document_id, origin_name, origin_locator, retrieved_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        document_id.get(),
                        source.origin_name,
                        source.origin_locator,
                        retrieved_at
                    ],
                )
                .map_err(|e| sql_error("record_source", &e))?;
            (self.conn.last_insert_rowid(), true)
        };

        let source = self
            .conn
            .query_row(
                &format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE source_id = ?1"),
                params![source_id],
                source_from_row,
            )
            .map_err(|e| sql_error("record_source", &e))?;
        Ok(RecordedSource { source, created })
    }

    fn append_duplicate_edge(&mut self, edge: NewDuplicateEdge) -> Result<DuplicateEdge> {
        self.conn
            .execute(
                "INSERT INTO duplicate_edges (document_id, matched_canonical_id, \
                 similarity_score, match_type, source_id, decided_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    edge.document_id.get(),
                    edge.matched_canonical_id.get(),
                    edge.similarity_score.clamp(0.0, 1.0),
                    edge.match_type.as_str(),
                    edge.source_id,
                    Utc::now().timestamp_millis(),
                ],
            )
            .map_err(|e| sql_error("append_duplicate_edge", &e))?;
        let edge_id = self.conn.last_insert_rowid();
        self.conn
            .query_row(
                &format!("SELECT {EDGE_COLUMNS} FROM duplicate_edges WHERE edge_id = ?1"),
                params![edge_id],
                edge_from_row,
            )
            .map_err(|e| sql_error("append_duplicate_edge", &e))
    }

    fn flag_ambiguous(
        &mut self,
        document_id: DocumentId,
        chosen: ScoredCluster,
        competitors: &[ScoredCluster],
    ) -> Result<AmbiguousMatch> {
        let encoded = serde_json::to_string(competitors).map_err(|e| Error::OperationFailed {
            operation: "flag_ambiguous".to_string(),
            cause: e.to_string(),
        })?;
        self.conn
            .execute(
                "INSERT INTO ambiguous_matches (document_id, chosen_canonical_id, chosen_score, \
                 competitors, flagged_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    document_id.get(),
                    chosen.canonical_id.get(),
                    chosen.score,
                    encoded,
                    Utc::now().timestamp_millis(),
                ],
            )
            .map_err(|e| sql_error("flag_ambiguous", &e))?;
        let review_id = self.conn.last_insert_rowid();
        self.conn
            .query_row(
                &format!("SELECT {AMBIGUOUS_COLUMNS} FROM ambiguous_matches WHERE review_id = ?1"),
                params![review_id],
                ambiguous_from_row,
            )
            .map_err(|e| sql_error("flag_ambiguous", &e))
    }
}

fn invariant_violation(cluster_id: DocumentId, detail: String) -> Error {
    tracing::error!(canonical_id = cluster_id.get(), detail = %detail, "cluster invariant violated");
    metrics::counter!("docanon_invariant_violations_total").increment(1);
    Error::InvariantViolation {
        canonical_id: cluster_id.get(),
        detail,
    }
}

/// Records `configured` in a fresh archive, or checks it against the values
/// the archive recorded when it was created.
fn reconcile_parameters(conn: &mut Connection, configured: &ArchiveParameters) -> Result<()> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| sql_error("archive_parameters", &e))?;
    let recorded: HashMap<String, String> = {
        let mut stmt = tx
            .prepare("SELECT name, value FROM archive_parameters")
            .map_err(|e| sql_error("archive_parameters", &e))?;
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .and_then(Iterator::collect)
            .map_err(|e| sql_error("archive_parameters", &e))?
    };

    for (name, value) in configured.entries() {
        match recorded.get(name) {
            Some(stored) if *stored != value => {
                tracing::error!(
                    parameter = name,
                    recorded = %stored,
                    configured = %value,
                    "archive parameter mismatch"
                );
                return Err(Error::InvalidInput(format!(
                    "archive was built with {name} = {stored}, configuration has {value}"
                )));
            },
            Some(_) => {},
            None => {
                tx.execute(
                    "INSERT INTO archive_parameters (name, value) VALUES (?1, ?2)",
                    params![name, value],
                )
                .map_err(|e| sql_error("archive_parameters", &e))?;
            },
        }
    }
    tx.commit().map_err(|e| sql_error("archive_parameters", &e))
}

fn load_document(conn: &Connection, id: DocumentId) -> Result<Document> {
    let mut stmt = conn
        .prepare_cached(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE document_id = ?1"
        ))
        .map_err(|e| sql_error("load_document", &e))?;
    stmt.query_row(params![id.get()], document_from_row)
        .optional()
        .map_err(|e| sql_error("load_document", &e))?
        .ok_or_else(|| Error::NotFound(format!("document #{id}")))
}

/// Signatures of documents with ids above `after`, in id order.
fn load_signatures(conn: &Connection, after: i64) -> Result<Vec<(DocumentId, SimilaritySignature)>> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT document_id, similarity_signature FROM documents \
             WHERE document_id > ?1 ORDER BY document_id",
        )
        .map_err(|e| sql_error("load_signatures", &e))?;
    stmt.query_map(params![after], |row| {
        let bytes: Vec<u8> = row.get(1)?;
        Ok((
            DocumentId::new(row.get(0)?),
            SimilaritySignature::from_bytes(&bytes),
        ))
    })
    .and_then(Iterator::collect)
    .map_err(|e| sql_error("load_signatures", &e))
}

fn query_documents(
    conn: &Connection,
    operation: &str,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Document>> {
    let mut stmt = conn
        .prepare_cached(sql)
        .map_err(|e| sql_error(operation, &e))?;
    stmt.query_map(params, document_from_row)
        .and_then(Iterator::collect)
        .map_err(|e| sql_error(operation, &e))
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn conversion_error(column: usize, detail: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(Error::InvalidInput(detail)),
    )
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    let signature: Vec<u8> = row.get(2)?;
    let length: i64 = row.get(5)?;
    let quality: Option<i64> = row.get(6)?;
    let page_count: Option<i64> = row.get(8)?;
    let byte_count: Option<i64> = row.get(9)?;
    Ok(Document {
        id: DocumentId::new(row.get(0)?),
        content_hash: row.get(1)?,
        similarity_signature: SimilaritySignature::from_bytes(&signature),
        raw_text: row.get(3)?,
        normalized_text: row.get(4)?,
        normalized_text_length: usize::try_from(length).unwrap_or(0),
        ocr_quality_score: quality.and_then(|q| u8::try_from(q).ok()),
        canonical_id: DocumentId::new(row.get(7)?),
        page_count: page_count.and_then(|p| u32::try_from(p).ok()),
        byte_count: byte_count.and_then(|b| u64::try_from(b).ok()),
        created_at: from_millis(row.get(10)?),
    })
}

fn source_from_row(row: &Row<'_>) -> rusqlite::Result<Source> {
    Ok(Source {
        id: row.get(0)?,
        document_id: DocumentId::new(row.get(1)?),
        origin_name: row.get(2)?,
        origin_locator: row.get(3)?,
        retrieved_at: from_millis(row.get(4)?),
    })
}

fn edge_from_row(row: &Row<'_>) -> rusqlite::Result<DuplicateEdge> {
    let match_type: String = row.get(4)?;
    let match_type = MatchType::parse(&match_type)
        .ok_or_else(|| conversion_error(4, format!("unknown match type '{match_type}'")))?;
    Ok(DuplicateEdge {
        id: row.get(0)?,
        document_id: DocumentId::new(row.get(1)?),
        matched_canonical_id: DocumentId::new(row.get(2)?),
        similarity_score: row.get(3)?,
        match_type,
        source_id: row.get(5)?,
        decided_at: from_millis(row.get(6)?),
    })
}

fn ambiguous_from_row(row: &Row<'_>) -> rusqlite::Result<AmbiguousMatch> {
    let competitors: String = row.get(4)?;
    let competitors: Vec<ScoredCluster> = serde_json::from_str(&competitors)
        .map_err(|e| conversion_error(4, format!("invalid competitor list: {e}")))?;
    Ok(AmbiguousMatch {
        id: row.get(0)?,
        document_id: DocumentId::new(row.get(1)?),
        chosen_canonical_id: DocumentId::new(row.get(2)?),
        chosen_score: row.get(3)?,
        competitors,
        flagged_at: from_millis(row.get(5)?),
        resolved: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> SqliteStoreOptions {
        SqliteStoreOptions {
            parameters: ArchiveParameters {
                signature_size: 4,
                bands: 2,
                ..ArchiveParameters::default()
            },
            ..SqliteStoreOptions::default()
        }
    }

    fn store() -> SqliteDocumentStore {
        SqliteDocumentStore::in_memory(&options()).unwrap()
    }

    fn new_doc(hash: &str, values: &[u64], quality: Option<u8>) -> NewDocument {
        NewDocument {
            content_hash: hash.to_string(),
            similarity_signature: SimilaritySignature::new(values.to_vec()),
            raw_text: format!("text for {hash}"),
            normalized_text: format!("text for {hash}"),
            normalized_text_length: 10,
            ocr_quality_score: quality,
            page_count: Some(2),
            byte_count: Some(2048),
        }
    }

    fn source(locator: &str) -> SourceDescriptor {
        SourceDescriptor::new("foia-2019-113", locator)
    }

    #[test]
    fn test_insert_new_canonical_points_at_itself() {
        let store = store();
        let doc = store
            .transaction("test", |tx| tx.insert_new_canonical(new_doc("a", &[1, 2, 3, 4], Some(80))))
            .unwrap();
        assert!(doc.is_canonical());
        assert_eq!(doc.ocr_quality_score, Some(80));
        assert_eq!(doc.page_count, Some(2));
        assert_eq!(doc.byte_count, Some(2048));
        assert_eq!(doc.similarity_signature.values(), &[1, 2, 3, 4]);

        let found = store
            .transaction("test", |tx| tx.find_by_content_hash("a"))
            .unwrap();
        assert_eq!(found.map(|d| d.id), Some(doc.id));
    }

    #[test]
    fn test_ids_increase_monotonically() {
        let store = store();
        let (a, b) = store
            .transaction("test", |tx| {
                let a = tx.insert_new_canonical(new_doc("a", &[1, 2, 3, 4], None))?;
                let b = tx.insert_new_canonical(new_doc("b", &[5, 6, 7, 8], None))?;
                Ok((a.id, b.id))
            })
            .unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_index_updated_after_commit_only() {
        let store = store();
        let failed: Result<()> = store.transaction("test", |tx| {
            tx.insert_new_canonical(new_doc("a", &[1, 2, 3, 4], None))?;
            Err(Error::InvalidInput("abort".to_string()))
        });
        assert!(failed.is_err());
        assert_eq!(store.index().bucket_count(), 0);
        assert_eq!(store.stats().unwrap().documents, 0);

        store
            .transaction("test", |tx| tx.insert_new_canonical(new_doc("a", &[1, 2, 3, 4], None)))
            .unwrap();
        let candidates = store
            .transaction("test", |tx| {
                tx.find_candidates_by_signature(&SimilaritySignature::new(vec![1, 2, 0, 0]), 10)
            })
            .unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn test_attach_promote_and_cluster() {
        let store = store();
        let (canonical, member) = store
            .transaction("test", |tx| {
                let canonical = tx.insert_new_canonical(new_doc("a", &[1, 2, 3, 4], Some(60)))?;
                let member =
                    tx.attach_as_duplicate(new_doc("b", &[1, 2, 3, 5], Some(95)), canonical.id)?;
                tx.record_source(canonical.id, &source("https://example.org/a.pdf"))?;
                tx.record_source(member.id, &source("https://example.org/b.pdf"))?;
                Ok((canonical.id, member.id))
            })
            .unwrap();

        let cluster = store.get_cluster(member).unwrap();
        assert_eq!(cluster.canonical.id, canonical);
        assert_eq!(cluster.member_ids, vec![canonical, member]);
        assert_eq!(cluster.sources.len(), 2);

        let repointed = store
            .transaction("test", |tx| tx.promote_to_canonical(member, canonical))
            .unwrap();
        assert_eq!(repointed, 2);

        let cluster = store.get_cluster(canonical).unwrap();
        assert_eq!(cluster.canonical.id, member);
        assert_eq!(cluster.len(), 2);
        assert!(store.verify_invariants().unwrap().is_empty());
    }

    #[test]
    fn test_attach_to_non_canonical_rejected() {
        let store = store();
        let result = store.transaction("test", |tx| {
            let canonical = tx.insert_new_canonical(new_doc("a", &[1, 2, 3, 4], None))?;
            let member = tx.attach_as_duplicate(new_doc("b", &[1, 2, 3, 5], None), canonical.id)?;
            tx.attach_as_duplicate(new_doc("c", &[9, 9, 9, 9], None), member.id)
        });
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(store.stats().unwrap().documents, 0);
    }

    #[test]
    fn test_promote_requires_membership() {
        let store = store();
        let result = store.transaction("test", |tx| {
            let a = tx.insert_new_canonical(new_doc("a", &[1, 2, 3, 4], None))?;
            let b = tx.insert_new_canonical(new_doc("b", &[5, 6, 7, 8], None))?;
            tx.promote_to_canonical(b.id, a.id)
        });
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_record_source_upserts_on_locator() {
        let store = store();
        let later = Utc::now() + chrono::Duration::hours(1);
        let (first, second) = store
            .transaction("test", |tx| {
                let doc = tx.insert_new_canonical(new_doc("a", &[1, 2, 3, 4], None))?;
                let first = tx.record_source(doc.id, &source("https://example.org/a.pdf"))?;
                let second = tx.record_source(
                    doc.id,
                    &source("https://example.org/a.pdf").with_retrieved_at(later),
                )?;
                Ok((first, second))
            })
            .unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.source.id, second.source.id);
        assert_eq!(
            second.source.retrieved_at.timestamp_millis(),
            later.timestamp_millis()
        );
        assert_eq!(store.stats().unwrap().sources, 1);
    }

    #[test]
    fn test_edges_and_history() {
        let store = store();
        let (a, b) = store
            .transaction("test", |tx| {
                let a = tx.insert_new_canonical(new_doc("a", &[1, 2, 3, 4], None))?;
                let b = tx.attach_as_duplicate(new_doc("b", &[1, 2, 3, 5], None), a.id)?;
                tx.append_duplicate_edge(NewDuplicateEdge {
                    document_id: b.id,
                    matched_canonical_id: a.id,
                    similarity_score: 0.75,
                    match_type: MatchType::Near,
                    source_id: None,
                })?;
                Ok((a.id, b.id))
            })
            .unwrap();

        let history_a = store.get_duplicate_history(a).unwrap();
        let history_b = store.get_duplicate_history(b).unwrap();
        assert_eq!(history_a, history_b);
        assert_eq!(history_a.len(), 1);
        assert_eq!(history_a[0].match_type, MatchType::Near);
        assert!(matches!(
            store.get_duplicate_history(DocumentId::new(99)),
            Err(Error::NotFound(_))
        ));

        let stats = store.stats().unwrap();
        assert_eq!(stats.near_edges, 1);
        assert_eq!(stats.exact_edges, 0);
        assert_eq!(stats.multi_member_clusters, 1);
    }

    #[test]
    fn test_ambiguous_review_queue() {
        let store = store();
        let record = store
            .transaction("test", |tx| {
                let a = tx.insert_new_canonical(new_doc("a", &[1, 2, 3, 4], None))?;
                let b = tx.insert_new_canonical(new_doc("b", &[5, 6, 7, 8], None))?;
                let c = tx.attach_as_duplicate(new_doc("c", &[1, 2, 7, 8], None), a.id)?;
                tx.flag_ambiguous(
                    c.id,
                    ScoredCluster {
                        canonical_id: a.id,
                        score: 0.5,
                    },
                    &[ScoredCluster {
                        canonical_id: b.id,
                        score: 0.5,
                    }],
                )
            })
            .unwrap();
        assert_eq!(record.competitors.len(), 1);
        assert!(!record.resolved);

        assert_eq!(store.list_ambiguous(false).unwrap().len(), 1);
        store.resolve_ambiguous(record.id).unwrap();
        assert!(store.list_ambiguous(false).unwrap().is_empty());
        assert_eq!(store.list_ambiguous(true).unwrap().len(), 1);
        assert!(matches!(
            store.resolve_ambiguous(999),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_tampered_cluster_fails_loudly_and_only_locally() {
        let store = store();
        let (a, b, c) = store
            .transaction("test", |tx| {
                let a = tx.insert_new_canonical(new_doc("a", &[1, 2, 3, 4], None))?;
                let b = tx.attach_as_duplicate(new_doc("b", &[1, 2, 3, 5], None), a.id)?;
                let c = tx.insert_new_canonical(new_doc("c", &[9, 8, 7, 6], None))?;
                Ok((a.id, b.id, c.id))
            })
            .unwrap();

        acquire_lock(&store.conn)
            .execute(
                "UPDATE documents SET canonical_id = ?1 WHERE document_id = ?2",
                params![b.get(), a.get()],
            )
            .unwrap();

        assert!(matches!(
            store.get_cluster(b),
            Err(Error::InvariantViolation { canonical_id, .. }) if canonical_id == a.get()
        ));
        assert!(store.get_cluster(c).is_ok());

        let issues = store.verify_invariants().unwrap();
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().any(|i| i.canonical_id == a));
    }

    #[test]
    fn test_list_clusters_multi_member_only() {
        let store = store();
        store
            .transaction("test", |tx| {
                let a = tx.insert_new_canonical(new_doc("a", &[1, 2, 3, 4], Some(70)))?;
                tx.attach_as_duplicate(new_doc("b", &[1, 2, 3, 5], None), a.id)?;
                tx.attach_as_duplicate(new_doc("c", &[1, 2, 3, 6], None), a.id)?;
                tx.record_source(a.id, &source("https://example.org/a.pdf"))?;
                tx.insert_new_canonical(new_doc("d", &[9, 9, 9, 9], None))?;
                Ok(())
            })
            .unwrap();

        let clusters = store.list_clusters(10).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].member_count, 3);
        assert_eq!(clusters[0].source_count, 1);
        assert_eq!(clusters[0].canonical_quality, Some(70));
        assert!(store.list_clusters(0).unwrap().is_empty());
    }

    #[test]
    fn test_rebuild_index_restores_candidates() {
        let store = store();
        store
            .transaction("test", |tx| tx.insert_new_canonical(new_doc("a", &[1, 2, 3, 4], None)))
            .unwrap();
        store.index().replace_all(Vec::new());
        assert_eq!(store.index().bucket_count(), 0);

        assert_eq!(store.rebuild_index().unwrap(), 1);
        assert_eq!(store.index().bucket_count(), 2);
    }

    #[test]
    fn test_missing_document() {
        let store = store();
        assert!(matches!(
            store.get_document(DocumentId::new(1)),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            store.get_cluster(DocumentId::new(1)),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_normalized_text_round_trips() {
        let store = store();
        let doc = store
            .transaction("test", |tx| tx.insert_new_canonical(new_doc("a", &[1, 2, 3, 4], None)))
            .unwrap();
        assert_eq!(store.get_document(doc.id).unwrap().normalized_text, "text for a");
    }

    #[test]
    fn test_merge_clusters_repoints_every_member() {
        let store = store();
        let (a, b, c) = store
            .transaction("test", |tx| {
                let a = tx.insert_new_canonical(new_doc("a", &[1, 2, 3, 4], Some(90)))?;
                let b = tx.insert_new_canonical(new_doc("b", &[5, 6, 7, 8], Some(70)))?;
                let c = tx.attach_as_duplicate(new_doc("c", &[5, 6, 7, 9], Some(60)), b.id)?;
                Ok((a.id, b.id, c.id))
            })
            .unwrap();

        let repointed = store
            .transaction("test", |tx| tx.merge_clusters(b, a))
            .unwrap();
        assert_eq!(repointed, 2);

        let cluster = store.get_cluster(c).unwrap();
        assert_eq!(cluster.canonical.id, a);
        assert_eq!(cluster.member_ids, vec![a, b, c]);
        assert!(store.verify_invariants().unwrap().is_empty());
        assert_eq!(store.stats().unwrap().clusters, 1);
    }

    #[test]
    fn test_merge_clusters_requires_two_canonicals() {
        let store = store();
        let result = store.transaction("test", |tx| {
            let a = tx.insert_new_canonical(new_doc("a", &[1, 2, 3, 4], None))?;
            let b = tx.insert_new_canonical(new_doc("b", &[5, 6, 7, 8], None))?;
            let member = tx.attach_as_duplicate(new_doc("c", &[5, 6, 7, 9], None), b.id)?;
            assert!(matches!(tx.merge_clusters(a.id, a.id), Err(Error::InvalidInput(_))));
            tx.merge_clusters(member.id, a.id)
        });
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_reopen_with_other_parameters_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.db");
        let options = options();
        drop(SqliteDocumentStore::open(&path, &options).unwrap());

        let reopened = SqliteDocumentStore::open(&path, &options).unwrap();
        assert_eq!(reopened.parameters(), &options.parameters);
        drop(reopened);

        let changed = SqliteStoreOptions {
            parameters: ArchiveParameters {
                shingle_size: 5,
                ..options.parameters.clone()
            },
            ..options.clone()
        };
        let Err(Error::InvalidInput(message)) = SqliteDocumentStore::open(&path, &changed) else {
            panic!("expected a parameter mismatch");
        };
        assert!(message.contains("shingle_size"));
    }

    #[test]
    fn test_open_existing_requires_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.db");
        assert!(matches!(
            SqliteDocumentStore::open_existing(&path, &options()),
            Err(Error::OperationFailed { .. })
        ));
        assert!(!path.exists());

        drop(SqliteDocumentStore::open(&path, &options()).unwrap());
        let store = SqliteDocumentStore::open_existing(&path, &options()).unwrap();
        assert_eq!(store.db_path(), Some(path.as_path()));
    }
}
