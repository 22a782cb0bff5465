//! Review and verification commands.

use super::{CommandStatus, OutputFormat, print_json, timestamp};
use docanon::DocumentStore;

/// Review command.
///
/// With `resolve`, marks that record as reviewed before listing.
pub fn cmd_review<S: DocumentStore>(
    store: &S,
    include_resolved: bool,
    resolve: Option<i64>,
    format: OutputFormat,
) -> docanon::Result<CommandStatus> {
    if let Some(review_id) = resolve {
        store.resolve_ambiguous(review_id)?;
        tracing::info!(review_id, "marked ambiguous match as reviewed");
    }

    let matches = store.list_ambiguous(include_resolved)?;
    match format {
        OutputFormat::Json => print_json(&matches)?,
        OutputFormat::Text if matches.is_empty() => println!("No ambiguous matches to review."),
        OutputFormat::Text => {
            for record in &matches {
                let competitors: Vec<String> = record
                    .competitors
                    .iter()
                    .map(|c| format!("#{} ({:.3})", c.canonical_id, c.score))
                    .collect();
                println!(
                    "[{}] {} #{} joined #{} ({:.3}); also matched {}{}",
                    record.id,
                    timestamp(&record.flagged_at),
                    record.document_id,
                    record.chosen_canonical_id,
                    record.chosen_score,
                    competitors.join(", "),
                    if record.resolved { " [resolved]" } else { "" }
                );
            }
        },
    }
    Ok(CommandStatus::Success)
}

/// Verify command.
pub fn cmd_verify<S: DocumentStore>(store: &S, format: OutputFormat) -> docanon::Result<CommandStatus> {
    let issues = store.verify_invariants()?;
    match format {
        OutputFormat::Json => print_json(&issues)?,
        OutputFormat::Text if issues.is_empty() => {
            let stats = store.stats()?;
            println!(
                "OK: {} clusters, each with exactly one canonical document.",
                stats.clusters
            );
        },
        OutputFormat::Text => {
            println!("{} cluster(s) violate the canonical invariant:", issues.len());
            for issue in &issues {
                println!("  cluster #{}: {}", issue.canonical_id, issue.detail);
            }
        },
    }
    Ok(if issues.is_empty() {
        CommandStatus::Success
    } else {
        CommandStatus::InvariantViolated
    })
}
