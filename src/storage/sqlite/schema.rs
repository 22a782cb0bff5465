//! Embedded schema migrations.
//!
//! Migrations are applied in version order at open, each in its own
//! transaction together with its `schema_migrations` row.

use crate::Result;
use crate::storage::resilience::sql_error;
use rusqlite::{Connection, OptionalExtension, params};

/// A single schema migration.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Sequential version, starting at 1.
    pub version: i64,
    /// Human-readable description.
    pub description: &'static str,
    /// Statements to execute.
    pub sql: &'static str,
}

/// Every migration, oldest first.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "documents, sources and duplicate edges",
        sql: r"
            CREATE TABLE documents (
                document_id INTEGER PRIMARY KEY AUTOINCREMENT,
                content_hash TEXT NOT NULL UNIQUE,
                similarity_signature BLOB NOT NULL,
                raw_text TEXT NOT NULL,
                normalized_text TEXT NOT NULL,
                normalized_text_length INTEGER NOT NULL,
                ocr_quality_score INTEGER CHECK (ocr_quality_score BETWEEN 0 AND 100),
                canonical_id INTEGER NOT NULL,
                page_count INTEGER,
                byte_count INTEGER,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX idx_documents_canonical ON documents (canonical_id);

            CREATE TABLE sources (
                source_id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id INTEGER NOT NULL REFERENCES documents (document_id),
                origin_name TEXT NOT NULL,
                origin_locator TEXT NOT NULL,
                retrieved_at INTEGER NOT NULL,
                UNIQUE (document_id, origin_locator)
            );

            CREATE TABLE duplicate_edges (
                edge_id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id INTEGER NOT NULL REFERENCES documents (document_id),
                matched_canonical_id INTEGER NOT NULL REFERENCES documents (document_id),
                similarity_score REAL NOT NULL
                    CHECK (similarity_score BETWEEN 0.0 AND 1.0),
                match_type TEXT NOT NULL CHECK (match_type IN ('exact', 'near')),
                source_id INTEGER REFERENCES sources (source_id),
                decided_at INTEGER NOT NULL
            );
            CREATE INDEX idx_edges_document ON duplicate_edges (document_id);
            CREATE INDEX idx_edges_matched ON duplicate_edges (matched_canonical_id);
        ",
    },
    Migration {
        version: 2,
        description: "ambiguous match review queue",
        sql: r"
            CREATE TABLE ambiguous_matches (
                review_id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id INTEGER NOT NULL REFERENCES documents (document_id),
                chosen_canonical_id INTEGER NOT NULL,
                chosen_score REAL NOT NULL,
                competitors TEXT NOT NULL,
                flagged_at INTEGER NOT NULL,
                resolved INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX idx_ambiguous_open ON ambiguous_matches (resolved);
        ",
    },
    Migration {
        version: 3,
        description: "fingerprinting parameters",
        sql: r"
            CREATE TABLE archive_parameters (
                name TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
        ",
    },
];

/// Latest schema version.
#[must_use]
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Current schema version, 0 for a fresh database.
///
/// # Errors
///
/// Returns an error if the version table cannot be read.
pub fn current_version(conn: &Connection) -> Result<i64> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations'",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| sql_error("schema_version", &e))?;
    if exists.is_none() {
        return Ok(0);
    }
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| sql_error("schema_version", &e))
}

/// Applies every pending migration. Returns how many were applied.
///
/// # Errors
///
/// Returns an error if a migration fails; that migration is rolled back.
pub fn migrate(conn: &mut Connection) -> Result<usize> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        )
        ",
    )
    .map_err(|e| sql_error("create_migrations_table", &e))?;

    let current = current_version(conn)?;
    let mut applied = 0;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
            .map_err(|e| sql_error("migration_begin", &e))?;
        tx.execute_batch(migration.sql)
            .map_err(|e| sql_error("migration_apply", &e))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
            params![
                migration.version,
                migration.description,
                chrono::Utc::now().timestamp_millis()
            ],
        )
        .map_err(|e| sql_error("migration_record", &e))?;
        tx.commit().map_err(|e| sql_error("migration_commit", &e))?;

        tracing::info!(
            version = migration.version,
            description = migration.description,
            "applied schema migration"
        );
        applied += 1;
    }
    Ok(applied)
}
