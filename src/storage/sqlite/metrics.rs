//! Metrics recording for store operations.

use std::time::Instant;

/// Records a store operation.
///
/// Emits `docanon_store_operations_total` (counter) and
/// `docanon_store_operation_duration_ms` (histogram), both labelled by
/// operation and status (`success` or `error`).
pub fn record_operation_metrics(operation: &'static str, start: Instant, status: &'static str) {
    metrics::counter!(
        "docanon_store_operations_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "docanon_store_operation_duration_ms",
        "operation" => operation,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}

/// Status label for a result.
pub const fn status_of<T>(result: &crate::Result<T>) -> &'static str {
    if result.is_ok() { "success" } else { "error" }
}
