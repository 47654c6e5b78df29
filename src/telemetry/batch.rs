//! Batch processing span helpers.
//!
//! Every processor call runs inside a `batch.process` span so logs emitted
//! by the processor carry the key and batch sequence.

use crate::model::FlushTrigger;
use std::fmt::Debug;
use tracing::Span;
use uuid::Uuid;

/// Start a span for one processor call.
///
/// The `batch.outcome` field is declared empty and is filled by
/// [`record_batch_outcome`].
pub fn start_batch_span(
    queue_id: &Uuid,
    key: &dyn Debug,
    seq: u64,
    size: usize,
    trigger: FlushTrigger,
) -> Span {
    tracing::info_span!(
        "batch.process",
        "queue.id" = %queue_id,
        "batch.key" = ?key,
        "batch.seq" = seq,
        "batch.size" = size,
        "batch.trigger" = trigger.as_str(),
        "batch.outcome" = tracing::field::Empty,
    )
}

/// Record how a processor call ended ("ok" | "error" | "panic").
pub fn record_batch_outcome(span: &Span, outcome: &str) {
    span.record("batch.outcome", outcome);
}
