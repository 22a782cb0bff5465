//! Data models for docanon.
//!
//! Plain data shared by the services and the store. Nothing in here performs
//! I/O; the store converts between these types and SQL rows.

mod cluster;
mod document;
mod edge;
mod ingest;
mod parameters;
mod signature;

pub use cluster::{Cluster, ClusterSummary, DedupStats, InvariantIssue};
pub use document::{Document, DocumentId, NewDocument, RecordedSource, Source, SourceDescriptor};
pub use edge::{AmbiguousMatch, DuplicateEdge, MatchType, NewDuplicateEdge, ScoredCluster};
pub use ingest::IngestRequest;
pub use parameters::ArchiveParameters;
pub use signature::SimilaritySignature;
