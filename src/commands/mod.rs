//! Command handlers.
//!
//! - `ingest.rs`: file ingestion
//! - `query.rs`: stats, cluster, clusters, history
//! - `review.rs`: ambiguity review queue and invariant verification

mod ingest;
mod query;
mod review;

pub use ingest::cmd_ingest;
pub use query::{cmd_cluster, cmd_clusters, cmd_history, cmd_stats};
pub use review::{cmd_review, cmd_verify};

use chrono::{DateTime, SecondsFormat, Utc};
use clap::ValueEnum;
use docanon::Error;
use serde::Serialize;

/// Exit code for malformed queries.
pub const EXIT_MALFORMED: u8 = 2;
/// Exit code when the store cannot be opened or stays locked.
pub const EXIT_STORE_UNREACHABLE: u8 = 3;
/// Exit code when a cluster invariant violation is found.
pub const EXIT_INVARIANT_VIOLATION: u8 = 4;

/// How command results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// How a command finished, when it did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// Everything succeeded.
    Success,
    /// Some inputs failed; the rest were processed.
    PartialFailure,
    /// The store holds a cluster without exactly one canonical.
    InvariantViolated,
}

/// Maps an error to the process exit code.
pub const fn exit_code(error: &Error) -> u8 {
    match error {
        Error::InvalidInput(_) | Error::NotFound(_) => EXIT_MALFORMED,
        Error::Contention { .. } => EXIT_STORE_UNREACHABLE,
        Error::InvariantViolation { .. } => EXIT_INVARIANT_VIOLATION,
        Error::OperationFailed { .. } => 1,
    }
}

/// Maps a failure to open the archive to the process exit code.
///
/// Configuration problems stay usage errors; anything else means the store
/// could not be reached.
pub const fn open_failure_code(error: &Error) -> u8 {
    match error {
        Error::OperationFailed { .. } => EXIT_STORE_UNREACHABLE,
        other => exit_code(other),
    }
}

/// Prints a value as pretty JSON.
fn print_json<T: Serialize + ?Sized>(value: &T) -> docanon::Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| Error::OperationFailed {
        operation: "serialize_output".to_string(),
        cause: e.to_string(),
    })?;
    println!("{json}");
    Ok(())
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn quality_label(score: Option<u8>) -> String {
    score.map_or_else(|| "native".to_string(), |q| q.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Error::InvalidInput("id".to_string()), 2 ; "invalid input")]
    #[test_case(Error::NotFound("#9".to_string()), 2 ; "unknown id")]
    #[test_case(Error::Contention { operation: "ingest".to_string(), attempts: 3 }, 3 ; "contention")]
    #[test_case(Error::InvariantViolation { canonical_id: 1, detail: String::new() }, 4 ; "invariant")]
    #[test_case(Error::OperationFailed { operation: "read".to_string(), cause: String::new() }, 1 ; "other")]
    fn test_exit_code(error: Error, expected: u8) {
        assert_eq!(exit_code(&error), expected);
    }

    #[test_case(Error::InvalidInput("bad threshold".to_string()), 2 ; "bad config")]
    #[test_case(Error::OperationFailed { operation: "open_store".to_string(), cause: String::new() }, 3 ; "cannot open")]
    #[test_case(Error::Contention { operation: "migrate".to_string(), attempts: 3 }, 3 ; "locked")]
    fn test_open_failure_code(error: Error, expected: u8) {
        assert_eq!(open_failure_code(&error), expected);
    }

    #[test]
    fn test_quality_label() {
        assert_eq!(quality_label(None), "native");
        assert_eq!(quality_label(Some(87)), "87");
    }
}
