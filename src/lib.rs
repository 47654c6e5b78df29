//! # batchq
//!
//! A per-key batched work queue for tokio.
//!
//! Producers offer keyed items; each partition key gets its own worker that
//! cuts bounded batches (by size or by wait time, whichever comes first) and
//! hands them to a caller-supplied processor. Per-key order is preserved,
//! keys never block each other, a failing batch only affects itself, and
//! shutdown drains everything that was accepted.

pub mod config;
pub mod error;
pub mod model;
pub mod processor;
pub mod queue;
pub mod stats;
pub mod telemetry;

pub use model::{Batch, FlushTrigger, Keyed};
pub use processor::{BatchFailure, BatchProcessor, FailureCause};
pub use queue::{KeyedBatchQueue, QueueBuilder, QueueConfig};
