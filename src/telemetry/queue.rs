//! Span helpers for queue operations.

use tracing::Span;

/// Start a span for one public queue operation.
///
/// `queue.id` is declared empty and filled in via [`record_item_id`] once
/// the operation knows which row it touched.
pub fn start_queue_span(table: &str, operation: &'static str) -> Span {
    tracing::debug_span!(
        "queue.op",
        "queue.table" = table,
        "queue.operation" = operation,
        "queue.id" = tracing::field::Empty,
    )
}

pub fn record_item_id(span: &Span, id: i64) {
    span.record("queue.id", id);
}
