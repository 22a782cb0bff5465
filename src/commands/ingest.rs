//! Ingest command.

use super::{CommandStatus, OutputFormat, print_json};
use docanon::{CanonicalizationService, Error, IngestOutcome, IngestRequest, SourceDescriptor};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Result line for one file.
#[derive(Serialize)]
struct FileReport {
    path: PathBuf,
    #[serde(flatten)]
    outcome: Option<IngestOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Ingest command.
///
/// Every file is one document from `origin`; its path is the locator.
/// A file that cannot be read or stored is reported and skipped.
pub fn cmd_ingest(
    service: &CanonicalizationService,
    files: &[PathBuf],
    origin: &str,
    ocr: bool,
    format: OutputFormat,
) -> docanon::Result<CommandStatus> {
    let mut reports = Vec::with_capacity(files.len());
    let mut failed = 0usize;

    for path in files {
        let result = read_request(path, origin, ocr).and_then(|request| service.ingest(request));
        let report = match result {
            Ok(outcome) => FileReport {
                path: path.clone(),
                outcome: Some(outcome),
                error: None,
            },
            Err(e) => {
                failed += 1;
                tracing::error!(path = %path.display(), error = %e, "failed to ingest file");
                FileReport {
                    path: path.clone(),
                    outcome: None,
                    error: Some(e.to_string()),
                }
            },
        };
        if format == OutputFormat::Text {
            print_text(&report);
        }
        reports.push(report);
    }

    if format == OutputFormat::Json {
        print_json(&reports)?;
    }

    Ok(if failed == 0 {
        CommandStatus::Success
    } else {
        CommandStatus::PartialFailure
    })
}

fn read_request(path: &Path, origin: &str, ocr: bool) -> docanon::Result<IngestRequest> {
    let bytes = std::fs::read(path).map_err(|e| Error::OperationFailed {
        operation: "read_input".to_string(),
        cause: format!("{}: {e}", path.display()),
    })?;
    let byte_count = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
    let text = String::from_utf8_lossy(&bytes).into_owned();
    let page_count = page_count(&text);

    let mut request = IngestRequest::new(
        text,
        SourceDescriptor::new(origin, path.display().to_string()),
    )
    .with_byte_count(byte_count)
    .with_ocr(ocr);
    if let Some(pages) = page_count {
        request = request.with_page_count(pages);
    }
    Ok(request)
}

/// Pages in extractor output that separates pages with form feeds.
fn page_count(text: &str) -> Option<u32> {
    let breaks = text.trim_end_matches(['\u{c}', '\n']).matches('\u{c}').count();
    (breaks > 0).then(|| u32::try_from(breaks + 1).unwrap_or(u32::MAX))
}

fn print_text(report: &FileReport) {
    let path = report.path.display();
    match (&report.outcome, &report.error) {
        (Some(outcome), _) => {
            let mut line = format!("{path}: {} -> #{}", outcome.decision, outcome.document_id);
            if outcome.promoted {
                line.push_str(" (promoted to canonical)");
            }
            if !outcome.source_created {
                line.push_str(" (source already recorded)");
            }
            if !outcome.merged.is_empty() {
                let merged: Vec<String> = outcome.merged.iter().map(|id| format!("#{id}")).collect();
                line.push_str(&format!(" (merged clusters {})", merged.join(", ")));
            }
            if let Some(review_id) = outcome.review_id {
                line.push_str(&format!(" [ambiguous, review {review_id}]"));
            }
            println!("{line}");
        },
        (None, Some(error)) => println!("{path}: error: {error}"),
        (None, None) => println!("{path}: skipped"),
    }
}
