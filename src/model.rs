//! Core data model.
//!
//! An item is anything with a partition key. Items sharing a key are
//! delivered to the processor in offer order, as batches.

use serde::Serialize;
use std::fmt;
use std::hash::Hash;

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// An item that can be routed by partition key.
pub trait Keyed: Send + 'static {
    /// The partition key. Each distinct key gets its own ordered worker.
    type Key: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static;

    /// The key this item is routed by.
    fn partition_key(&self) -> Self::Key;
}

/// `(key, payload)` pairs are keyed by their first element.
impl<K, V> Keyed for (K, V)
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + 'static,
{
    type Key = K;

    fn partition_key(&self) -> K {
        self.0.clone()
    }
}

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

/// Why a batch was cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushTrigger {
    /// The buffer reached `max_batch_size`.
    Size,
    /// `max_wait` elapsed since the first item of the window.
    Timeout,
    /// The queue is shutting down and the remainder is being flushed.
    Drain,
}

impl FlushTrigger {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Timeout => "timeout",
            Self::Drain => "drain",
        }
    }
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered group of items for one key, handed to the processor as a unit.
///
/// Owned snapshot: once cut, producers can no longer affect it.
#[derive(Debug, Clone)]
pub struct Batch<T: Keyed> {
    /// Partition key shared by every item in the batch.
    pub key: T::Key,
    /// Per-worker batch counter, starting at 1.
    pub seq: u64,
    /// What caused the flush.
    pub trigger: FlushTrigger,
    /// Items in offer order. Never empty, never longer than `max_batch_size`.
    pub items: Vec<T>,
}

impl<T: Keyed> Batch<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

impl<T: Keyed> IntoIterator for Batch<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuple_items_are_keyed_by_first_element() {
        let item = ("c1".to_string(), 42_u32);
        assert_eq!(item.partition_key(), "c1");
    }

    #[test]
    fn batch_iterates_in_order() {
        let batch = Batch {
            key: "c1",
            seq: 1,
            trigger: FlushTrigger::Size,
            items: vec![("c1", 1), ("c1", 2), ("c1", 3)],
        };
        assert_eq!(batch.len(), 3);
        let values: Vec<_> = batch.into_iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn trigger_labels() {
        assert_eq!(FlushTrigger::Size.to_string(), "size");
        assert_eq!(FlushTrigger::Timeout.as_str(), "timeout");
        assert_eq!(FlushTrigger::Drain.as_str(), "drain");
    }
}
