//! Storage layer.
//!
//! Documents, sources, duplicate edges and the ambiguity review queue live in
//! `SQLite` ([`SqliteDocumentStore`]). An in-memory band index
//! ([`SignatureIndex`]) narrows near-duplicate lookups to a handful of
//! candidates and is rebuilt from the stored signatures on open.

// Allow significant_drop_tightening - the connection guard is held for the
// whole transaction on purpose.
#![allow(clippy::significant_drop_tightening)]

pub mod index;
pub mod resilience;
pub mod sqlite;
pub mod traits;

pub use index::SignatureIndex;
pub use resilience::RetryPolicy;
pub use sqlite::{SqliteDocumentStore, SqliteStoreOptions};
pub use traits::{DocumentStore, StoreTransaction};
