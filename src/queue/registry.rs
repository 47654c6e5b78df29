//! Key → worker routing table.
//!
//! The only state shared between producers. Everything that must be atomic
//! with respect to concurrent offers happens under one mutex: the closed
//! flag, get-or-create of a key's worker, the channel send itself, idle
//! eviction, and the shutdown hand-over of all live workers.

use crate::error::{Error, Result};
use crate::model::Keyed;
use crate::stats::Counters;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::error::SendError;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use super::worker::Envelope;

/// A live per-key worker as seen by the registry.
pub(crate) struct WorkerEntry<T> {
    pub id: u64,
    pub tx: UnboundedSender<Envelope<T>>,
    pub task: JoinHandle<()>,
}

struct RegistryState<T: Keyed> {
    closed: bool,
    next_worker_id: u64,
    workers: HashMap<T::Key, WorkerEntry<T>>,
}

pub(crate) struct Registry<T: Keyed> {
    state: Mutex<RegistryState<T>>,
    drained: watch::Sender<bool>,
}

impl<T: Keyed> Registry<T> {
    pub fn new() -> Self {
        let (drained, _) = watch::channel(false);
        Self {
            state: Mutex::new(RegistryState {
                closed: false,
                next_worker_id: 1,
                workers: HashMap::new(),
            }),
            drained,
        }
    }

    // A panic while holding the lock cannot leave the map half-updated, so
    // poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, RegistryState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Route each group to its key's worker, creating workers for unseen keys.
    ///
    /// All-or-nothing: once the registry is closed nothing is enqueued.
    pub fn enqueue<S>(
        &self,
        groups: Vec<(T::Key, Vec<T>)>,
        item_count: usize,
        counters: &Counters,
        mut spawn: S,
    ) -> Result<()>
    where
        S: FnMut(&T::Key, u64) -> WorkerEntry<T>,
    {
        let mut guard = self.lock();
        if guard.closed {
            return Err(Error::ShuttingDown);
        }
        Counters::add(&counters.items_offered, item_count);

        let state = &mut *guard;
        for (key, items) in groups {
            let entry = state.workers.entry(key.clone()).or_insert_with(|| {
                let id = state.next_worker_id;
                state.next_worker_id += 1;
                spawn(&key, id)
            });

            for item in items {
                if let Err(SendError(envelope)) = entry.tx.send(Envelope::new(item)) {
                    // The worker task died without deregistering. Replace it;
                    // nothing it owned can still be in flight.
                    warn!(key = ?key, worker_id = entry.id, "per-key worker gone, respawning");
                    let id = state.next_worker_id;
                    state.next_worker_id += 1;
                    *entry = spawn(&key, id);
                    if entry.tx.send(envelope).is_err() {
                        warn!(key = ?key, worker_id = id, "respawned worker unavailable, item dropped");
                    }
                }
            }
        }
        Ok(())
    }

    /// Remove the worker `id` for `key` if nothing is waiting for it.
    ///
    /// Called by the worker itself after its idle timeout. Returns `true`
    /// if the worker is now deregistered and must exit.
    pub fn evict_if_idle(&self, key: &T::Key, id: u64, rx: &UnboundedReceiver<Envelope<T>>) -> bool {
        let mut state = self.lock();
        if state.closed || !rx.is_empty() {
            return false;
        }
        match state.workers.get(key) {
            Some(entry) if entry.id == id => {
                state.workers.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Close the registry and take every live worker.
    ///
    /// Returns `None` if it was already closed.
    pub fn close(&self) -> Option<Vec<(T::Key, WorkerEntry<T>)>> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        state.closed = true;
        Some(state.workers.drain().collect())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn live_keys(&self) -> usize {
        self.lock().workers.len()
    }

    pub fn subscribe_drained(&self) -> watch::Receiver<bool> {
        self.drained.subscribe()
    }

    pub fn mark_drained(&self) {
        self.drained.send_replace(true);
    }
}
