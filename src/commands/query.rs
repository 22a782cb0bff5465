//! Read-only query commands.

use super::{CommandStatus, OutputFormat, print_json, quality_label, timestamp};
use docanon::{DocumentId, DocumentStore};

/// Stats command.
pub fn cmd_stats<S: DocumentStore>(store: &S, format: OutputFormat) -> docanon::Result<CommandStatus> {
    let stats = store.stats()?;
    match format {
        OutputFormat::Json => print_json(&stats)?,
        OutputFormat::Text => {
            println!("Archive statistics:");
            println!("  Documents:             {}", stats.documents);
            println!("  Clusters:              {}", stats.clusters);
            println!("  Multi-member clusters: {}", stats.multi_member_clusters);
            println!("  Sources:               {}", stats.sources);
            println!(
                "  Duplicate edges:       {} ({} exact, {} near)",
                stats.duplicate_edges, stats.exact_edges, stats.near_edges
            );
            println!("  Ambiguous matches:     {}", stats.ambiguous_matches);
        },
    }
    Ok(CommandStatus::Success)
}

/// Cluster command.
pub fn cmd_cluster<S: DocumentStore>(
    store: &S,
    id: DocumentId,
    format: OutputFormat,
) -> docanon::Result<CommandStatus> {
    let cluster = store.get_cluster(id)?;
    match format {
        OutputFormat::Json => print_json(&cluster)?,
        OutputFormat::Text => {
            let canonical = &cluster.canonical;
            println!(
                "Cluster #{} ({} members, {} sources)",
                canonical.id,
                cluster.len(),
                cluster.sources.len()
            );
            println!("  Canonical: #{}", canonical.id);
            println!("    Hash:      {}", canonical.content_hash);
            println!("    Quality:   {}", quality_label(canonical.ocr_quality_score));
            println!("    Length:    {} chars normalized", canonical.normalized_text_length);
            if let Some(pages) = canonical.page_count {
                println!("    Pages:     {pages}");
            }
            println!("    Archived:  {}", timestamp(&canonical.created_at));
            let members: Vec<String> = cluster.member_ids.iter().map(|m| format!("#{m}")).collect();
            println!("  Members: {}", members.join(" "));
            println!("  Sources:");
            for source in &cluster.sources {
                println!(
                    "    - #{} {} {} ({})",
                    source.document_id,
                    source.origin_name,
                    source.origin_locator,
                    timestamp(&source.retrieved_at)
                );
            }
        },
    }
    Ok(CommandStatus::Success)
}

/// Clusters command.
pub fn cmd_clusters<S: DocumentStore>(
    store: &S,
    limit: usize,
    format: OutputFormat,
) -> docanon::Result<CommandStatus> {
    let clusters = store.list_clusters(limit)?;
    match format {
        OutputFormat::Json => print_json(&clusters)?,
        OutputFormat::Text if clusters.is_empty() => println!("No duplicate clusters."),
        OutputFormat::Text => {
            println!("{:>10} {:>8} {:>8} {:>8}", "CANONICAL", "MEMBERS", "SOURCES", "QUALITY");
            for summary in &clusters {
                println!(
                    "{:>10} {:>8} {:>8} {:>8}",
                    format!("#{}", summary.canonical_id),
                    summary.member_count,
                    summary.source_count,
                    quality_label(summary.canonical_quality)
                );
            }
        },
    }
    Ok(CommandStatus::Success)
}

/// History command.
pub fn cmd_history<S: DocumentStore>(
    store: &S,
    id: DocumentId,
    format: OutputFormat,
) -> docanon::Result<CommandStatus> {
    let edges = store.get_duplicate_history(id)?;
    match format {
        OutputFormat::Json => print_json(&edges)?,
        OutputFormat::Text if edges.is_empty() => println!("No duplicate decisions involve #{id}."),
        OutputFormat::Text => {
            for edge in &edges {
                let source = edge
                    .source_id
                    .map_or_else(String::new, |s| format!(" via source {s}"));
                println!(
                    "{} #{} {} match of #{} (score {:.3}){source}",
                    timestamp(&edge.decided_at),
                    edge.document_id,
                    edge.match_type,
                    edge.matched_canonical_id,
                    edge.similarity_score
                );
            }
        },
    }
    Ok(CommandStatus::Success)
}
