//! Metric instrument factories.
//!
//! Instruments come from the `"sqlq"` meter on the globally registered
//! `MeterProvider`; without one installed they are no-ops.

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("sqlq")
}

/// Counter: queue operations.
/// Labels: `queue`, `operation` ("put" | "put_duplicate" | "get" | "get_empty"
/// | "update" | "task_done").
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("sqlq.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Histogram: time a consumer spent blocked in `get`, in milliseconds.
/// Labels: `queue`.
pub fn queue_wait_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("sqlq.queue.wait_ms")
        .with_description("Time spent waiting for an item")
        .with_unit("ms")
        .build()
}

/// Record one operation against `queue`.
pub fn record_operation(queue: &str, operation: &'static str) {
    queue_operations().add(
        1,
        &[
            KeyValue::new("queue", queue.to_string()),
            KeyValue::new("operation", operation),
        ],
    );
}
