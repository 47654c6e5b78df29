//! Point-in-time queue counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Snapshot returned by [`crate::queue::KeyedBatchQueue::stats`].
///
/// After `shutdown` returns, `items_processed + items_failed` equals the
/// number of items accepted by `offer`/`offer_all`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queue_id: Uuid,
    pub live_keys: usize,
    pub items_offered: u64,
    pub items_rejected: u64,
    pub items_processed: u64,
    pub items_failed: u64,
    pub batches_dispatched: u64,
    pub batches_failed: u64,
    pub workers_started: u64,
    pub workers_evicted: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub items_offered: AtomicU64,
    pub items_rejected: AtomicU64,
    pub items_processed: AtomicU64,
    pub items_failed: AtomicU64,
    pub batches_dispatched: AtomicU64,
    pub batches_failed: AtomicU64,
    pub workers_started: AtomicU64,
    pub workers_evicted: AtomicU64,
}

impl Counters {
    pub fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self, queue_id: Uuid, live_keys: usize) -> QueueStats {
        QueueStats {
            queue_id,
            live_keys,
            items_offered: self.items_offered.load(Ordering::Relaxed),
            items_rejected: self.items_rejected.load(Ordering::Relaxed),
            items_processed: self.items_processed.load(Ordering::Relaxed),
            items_failed: self.items_failed.load(Ordering::Relaxed),
            batches_dispatched: self.batches_dispatched.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            workers_started: self.workers_started.load(Ordering::Relaxed),
            workers_evicted: self.workers_evicted.load(Ordering::Relaxed),
        }
    }
}
