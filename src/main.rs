//! Binary entry point for docanon.
//!
//! Logs go to stderr; command output goes to stdout.
//!
//! | Exit code | Meaning |
//! |-----------|---------|
//! | 0 | success |
//! | 1 | any other failure |
//! | 2 | malformed query (usage errors, invalid or unknown ids, bad config) |
//! | 3 | store unreachable (cannot open, or locked through every retry) |
//! | 4 | invariant violation found by `verify` or `cluster` |
//!
//! Only `ingest` creates a missing archive; every other command requires the
//! database file to exist.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

mod commands;

use clap::{Parser, Subcommand};
use commands::{CommandStatus, OutputFormat};
use docanon::observability::{self, LoggingConfig};
use docanon::{CanonicalizationService, DocanonConfig, DocumentId};
use std::path::PathBuf;
use std::process::ExitCode;

/// Docanon - deduplicate and canonicalize noisy document archives.
#[derive(Parser)]
#[command(name = "docanon")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the archive database (overrides the config file).
    #[arg(long, global = true, env = "DOCANON_DB")]
    db: Option<PathBuf>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Enable verbose (debug) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Ingest extracted-text files supplied by one origin.
    Ingest {
        /// Text files to ingest.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Name of the release, dump or batch the files came from.
        #[arg(short, long)]
        origin: String,

        /// The files hold a native text layer, not OCR output.
        #[arg(long)]
        native: bool,
    },

    /// Show archive-wide counters.
    Stats,

    /// Show the cluster containing a document.
    Cluster {
        /// Any member's document id (e.g. `7` or `#7`).
        id: DocumentId,
    },

    /// List clusters with more than one member.
    Clusters {
        /// Maximum number of clusters to list.
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show duplicate decisions involving a document.
    History {
        /// Document id.
        id: DocumentId,
    },

    /// List ambiguous near matches awaiting review.
    Review {
        /// Include matches already marked as reviewed.
        #[arg(long)]
        all: bool,

        /// Mark a review record as resolved.
        #[arg(long, value_name = "REVIEW_ID")]
        resolve: Option<i64>,
    },

    /// Check every cluster for exactly one canonical document.
    Verify,
}

impl Commands {
    /// Whether the command may create the archive when it does not exist.
    const fn creates_archive(&self) -> bool {
        matches!(self, Self::Ingest { .. })
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match DocanonConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::from(commands::exit_code(&e));
        },
    };
    if let Some(db) = cli.db.clone() {
        config = config.with_db_path(db);
    }

    let logging = LoggingConfig::from_settings(Some(&config.logging), cli.verbose);
    if let Err(e) = observability::init(&logging) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let service = match open_service(&config, &cli.command) {
        Ok(service) => service,
        Err(code) => return ExitCode::from(code),
    };

    match run_command(cli.command, &service, cli.format) {
        Ok(CommandStatus::Success) => ExitCode::SUCCESS,
        Ok(CommandStatus::PartialFailure) => ExitCode::FAILURE,
        Ok(CommandStatus::InvariantViolated) => {
            ExitCode::from(commands::EXIT_INVARIANT_VIOLATION)
        },
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(commands::exit_code(&e))
        },
    }
}

/// Opens the archive for `command`, reporting failures on stderr.
///
/// Returns the exit code to use when the archive cannot be opened.
fn open_service(config: &DocanonConfig, command: &Commands) -> Result<CanonicalizationService, u8> {
    let opened = if command.creates_archive() {
        CanonicalizationService::open(config)
    } else {
        CanonicalizationService::open_existing(config)
    };
    opened.map_err(|e| {
        eprintln!(
            "Failed to open archive {}: {e}",
            config.storage.db_path.display()
        );
        commands::open_failure_code(&e)
    })
}

/// Runs the selected command.
fn run_command(
    command: Commands,
    service: &CanonicalizationService,
    format: OutputFormat,
) -> docanon::Result<CommandStatus> {
    match command {
        Commands::Ingest {
            files,
            origin,
            native,
        } => commands::cmd_ingest(service, &files, &origin, !native, format),
        Commands::Stats => commands::cmd_stats(service.store(), format),
        Commands::Cluster { id } => commands::cmd_cluster(service.store(), id, format),
        Commands::Clusters { limit } => commands::cmd_clusters(service.store(), limit, format),
        Commands::History { id } => commands::cmd_history(service.store(), id, format),
        Commands::Review { all, resolve } => {
            commands::cmd_review(service.store(), all, resolve, format)
        },
        Commands::Verify => commands::cmd_verify(service.store(), format),
    }
}
