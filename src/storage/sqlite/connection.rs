//! Connection handling for the `SQLite` store.
//!
//! One `Mutex<Connection>` per store: the mutex serializes this process's
//! access, `BEGIN IMMEDIATE` plus `busy_timeout` serialize writers across
//! processes.

use crate::storage::resilience::sql_error;
use crate::{Error, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Default time `SQLite` waits on a locked database before reporting busy.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Acquires the connection mutex, recovering from poison.
///
/// A panic inside a previous critical section poisons the mutex; the
/// connection itself is still usable because any open transaction was rolled
/// back when it was dropped during unwinding.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("SQLite mutex was poisoned, recovering");
            metrics::counter!("docanon_sqlite_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Opens a database file, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if the directory cannot be created or
/// the file cannot be opened.
pub fn open_file(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
            operation: "create_db_dir".to_string(),
            cause: format!("{}: {e}", parent.display()),
        })?;
    }
    Connection::open(path).map_err(|e| Error::OperationFailed {
        operation: "open_store".to_string(),
        cause: format!("{}: {e}", path.display()),
    })
}

/// Opens a database file that must already exist.
///
/// Used by commands that only inspect an archive, so a mistyped path is
/// reported instead of silently creating an empty database.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if the file does not exist or cannot
/// be opened.
pub fn open_existing_file(path: &Path) -> Result<Connection> {
    let flags =
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    Connection::open_with_flags(path, flags).map_err(|e| Error::OperationFailed {
        operation: "open_store".to_string(),
        cause: format!("{}: {e}", path.display()),
    })
}

/// Applies connection settings.
///
/// # Configuration Applied
///
/// - **WAL mode**: readers never block the writer
/// - **NORMAL synchronous**: durable at checkpoints, fast commits
/// - **`busy_timeout`**: wait for another process's write lock before failing
/// - **foreign keys**: sources and edges must reference stored documents
///
/// # Errors
///
/// Returns an error if enabling foreign keys or the busy timeout fails.
pub fn configure_connection(conn: &Connection, busy_timeout: Duration) -> Result<()> {
    // in-memory databases stay in "memory" mode
    let _ = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
        row.get::<_, String>(0)
    });
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    conn.busy_timeout(busy_timeout)
        .map_err(|e| sql_error("configure_busy_timeout", &e))?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| sql_error("configure_foreign_keys", &e))?;
    Ok(())
}
