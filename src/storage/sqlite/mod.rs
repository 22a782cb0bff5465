//! `SQLite` storage backend.
//!
//! ## Module Structure
//!
//! - [`connection`]: connection settings and poison-tolerant locking
//! - [`schema`]: embedded, versioned migrations
//! - [`metrics`]: per-operation counters and latency histograms
//! - `store`: [`SqliteDocumentStore`] and its transaction handle

pub mod connection;
mod metrics;
pub mod schema;
mod store;

pub use connection::{
    DEFAULT_BUSY_TIMEOUT, acquire_lock, configure_connection, open_existing_file,
};
pub use store::{SqliteDocumentStore, SqliteStoreOptions};
