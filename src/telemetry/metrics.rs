//! Metric instrument factories for batchq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created from the `"batchq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for batchq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("batchq")
}

/// Counter: items accepted by `offer`/`offer_all`.
pub fn items_offered() -> Counter<u64> {
    meter()
        .u64_counter("batchq.items.offered")
        .with_description("Number of items accepted into the queue")
        .build()
}

/// Counter: items rejected because the queue was shutting down.
pub fn items_rejected() -> Counter<u64> {
    meter()
        .u64_counter("batchq.items.rejected")
        .with_description("Number of items rejected during shutdown")
        .build()
}

/// Counter: batches handed to the processor.
/// Labels: `trigger` ("size" | "timeout" | "drain").
pub fn batches_dispatched() -> Counter<u64> {
    meter()
        .u64_counter("batchq.batches.dispatched")
        .with_description("Number of batches handed to the processor")
        .build()
}

/// Counter: batches whose processing failed.
/// Labels: `cause` ("error" | "panic").
pub fn batches_failed() -> Counter<u64> {
    meter()
        .u64_counter("batchq.batches.failed")
        .with_description("Number of batches whose processing failed")
        .build()
}

/// Histogram: items per dispatched batch.
pub fn batch_size() -> Histogram<u64> {
    meter()
        .u64_histogram("batchq.batch.size")
        .with_description("Items per dispatched batch")
        .build()
}

/// Histogram: processor call duration in milliseconds.
pub fn batch_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("batchq.batch.duration_ms")
        .with_description("Batch processing duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: per-key workers spawned.
pub fn workers_started() -> Counter<u64> {
    meter()
        .u64_counter("batchq.workers.started")
        .with_description("Number of per-key workers spawned")
        .build()
}

/// Counter: per-key workers that exited.
/// Labels: `reason` ("drained" | "idle").
pub fn workers_stopped() -> Counter<u64> {
    meter()
        .u64_counter("batchq.workers.stopped")
        .with_description("Number of per-key workers that exited")
        .build()
}

/// Instruments for one queue instance, built once at construction.
#[derive(Clone)]
pub(crate) struct QueueMetrics {
    pub items_offered: Counter<u64>,
    pub items_rejected: Counter<u64>,
    pub batches_dispatched: Counter<u64>,
    pub batches_failed: Counter<u64>,
    pub batch_size: Histogram<u64>,
    pub batch_duration_ms: Histogram<f64>,
    pub workers_started: Counter<u64>,
    pub workers_stopped: Counter<u64>,
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self {
            items_offered: items_offered(),
            items_rejected: items_rejected(),
            batches_dispatched: batches_dispatched(),
            batches_failed: batches_failed(),
            batch_size: batch_size(),
            batch_duration_ms: batch_duration_ms(),
            workers_started: workers_started(),
            workers_stopped: workers_stopped(),
        }
    }
}
