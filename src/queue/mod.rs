//! Per-key batched work queue.
//!
//! Items are routed by partition key to a dedicated worker task per key.
//! Each worker cuts batches of at most `max_batch_size` items, or whatever
//! has accumulated `max_wait` after the first item of a window, and hands
//! them to the processor one at a time. Keys never wait on each other.
//!
//! ```no_run
//! # use batchq::queue::{KeyedBatchQueue, QueueConfig};
//! # use batchq::model::Batch;
//! # use std::time::Duration;
//! # async fn demo() -> batchq::error::Result<()> {
//! let queue = KeyedBatchQueue::new(
//!     QueueConfig::new(25, Duration::from_millis(100)),
//!     |batch: Batch<(String, String)>| async move {
//!         println!("{:?}: {} updates", batch.key, batch.len());
//!         Ok::<(), String>(())
//!     },
//! )?;
//! queue.offer(("channel-1".to_string(), "hello".to_string()))?;
//! queue.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
mod registry;
mod worker;

pub use config::QueueConfig;

use crate::error::{Error, Result};
use crate::model::Keyed;
use crate::processor::{BatchFailure, BatchProcessor, ErrorSink};
use crate::stats::{Counters, QueueStats};
use crate::telemetry::metrics::QueueMetrics;
use futures::future::join_all;
use registry::{Registry, WorkerEntry};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;
use worker::{Worker, WorkerContext};

/// Builds a [`KeyedBatchQueue`] with optional hooks.
pub struct QueueBuilder<K, E> {
    config: QueueConfig,
    error_sink: Option<ErrorSink<K, E>>,
}

impl<K, E> QueueBuilder<K, E> {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            error_sink: None,
        }
    }

    /// Called once for every batch whose processing fails or panics.
    ///
    /// Failures are logged whether or not a sink is installed.
    pub fn error_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(BatchFailure<K, E>) + Send + Sync + 'static,
    {
        self.error_sink = Some(Arc::new(sink));
        self
    }

    /// Validate the configuration and create the queue.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] for an unusable configuration and
    /// [`Error::NoRuntime`] when called outside a tokio runtime.
    pub fn build<T, P>(self, processor: P) -> Result<KeyedBatchQueue<T, P>>
    where
        T: Keyed<Key = K>,
        P: BatchProcessor<T, Error = E>,
    {
        self.config.validate()?;
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let ctx = WorkerContext {
            queue_id: Uuid::new_v4(),
            config: self.config,
            processor,
            error_sink: self.error_sink,
            counters: Counters::default(),
            metrics: QueueMetrics::new(),
        };
        info!(
            queue_id = %ctx.queue_id,
            max_batch_size = ctx.config.max_batch_size,
            max_wait = ?ctx.config.max_wait,
            idle_timeout = ?ctx.config.idle_timeout,
            "queue created"
        );

        Ok(KeyedBatchQueue {
            ctx: Arc::new(ctx),
            registry: Arc::new(Registry::new()),
            runtime,
        })
    }
}

/// A per-key batched work queue.
///
/// Cloning yields another handle to the same queue. If every handle is
/// dropped without [`shutdown`](Self::shutdown), workers still drain their
/// remaining items in the background.
pub struct KeyedBatchQueue<T: Keyed, P: BatchProcessor<T>> {
    ctx: Arc<WorkerContext<T, P>>,
    registry: Arc<Registry<T>>,
    runtime: Handle,
}

impl<T: Keyed, P: BatchProcessor<T>> Clone for KeyedBatchQueue<T, P> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            registry: Arc::clone(&self.registry),
            runtime: self.runtime.clone(),
        }
    }
}

impl<T: Keyed, P: BatchProcessor<T>> KeyedBatchQueue<T, P> {
    /// Create a queue with no error sink. See [`QueueBuilder::build`].
    pub fn new(config: QueueConfig, processor: P) -> Result<Self> {
        QueueBuilder::new(config).build(processor)
    }

    pub fn id(&self) -> Uuid {
        self.ctx.queue_id
    }

    /// Enqueue one item for its key. Never waits for processing.
    ///
    /// # Errors
    ///
    /// [`Error::ShuttingDown`] once [`shutdown`](Self::shutdown) has begun;
    /// the item is dropped.
    pub fn offer(&self, item: T) -> Result<()> {
        let key = item.partition_key();
        self.enqueue(vec![(key, vec![item])], 1)
    }

    /// Enqueue many items, keeping each key's items in their given order.
    ///
    /// Either every item is accepted or, during shutdown, none is.
    pub fn offer_all<I>(&self, items: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
    {
        let mut groups: Vec<(T::Key, Vec<T>)> = Vec::new();
        let mut slots: HashMap<T::Key, usize> = HashMap::new();
        let mut count = 0;
        for item in items {
            count += 1;
            let key = item.partition_key();
            match slots.get(&key) {
                Some(&slot) => groups[slot].1.push(item),
                None => {
                    slots.insert(key.clone(), groups.len());
                    groups.push((key, vec![item]));
                }
            }
        }
        self.enqueue(groups, count)
    }

    fn enqueue(&self, groups: Vec<(T::Key, Vec<T>)>, count: usize) -> Result<()> {
        let counters = &self.ctx.counters;
        let result = self
            .registry
            .enqueue(groups, count, counters, |key, id| self.spawn_worker(key, id));

        let metrics = &self.ctx.metrics;
        match result {
            Ok(()) => metrics.items_offered.add(count as u64, &[]),
            Err(_) => {
                Counters::add(&counters.items_rejected, count);
                metrics.items_rejected.add(count as u64, &[]);
                debug!(queue_id = %self.ctx.queue_id, count, "offer rejected, queue shutting down");
            }
        }
        result
    }

    fn spawn_worker(&self, key: &T::Key, id: u64) -> WorkerEntry<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker::new(
            id,
            key.clone(),
            rx,
            Arc::clone(&self.ctx),
            Arc::downgrade(&self.registry),
        );
        let task = self.runtime.spawn(worker.run());

        Counters::add(&self.ctx.counters.workers_started, 1);
        self.ctx.metrics.workers_started.add(1, &[]);
        WorkerEntry { id, tx, task }
    }

    /// Stop accepting items, drain every key, and wait for all workers.
    ///
    /// Every item accepted before this call is handed to the processor
    /// before it returns. Safe to call more than once or concurrently: later
    /// callers wait for the first shutdown to complete.
    pub async fn shutdown(&self) {
        let mut drained = self.registry.subscribe_drained();

        if let Some(workers) = self.registry.close() {
            info!(
                queue_id = %self.ctx.queue_id,
                live_keys = workers.len(),
                "shutting down, draining per-key workers"
            );

            // Closing each channel tells its worker to drain.
            let mut tasks = Vec::with_capacity(workers.len());
            for (key, WorkerEntry { tx, task, .. }) in workers {
                drop(tx);
                tasks.push(async move { (key, task.await) });
            }

            // Joined on a separate task so a cancelled caller cannot strand
            // the other waiters.
            let registry = Arc::clone(&self.registry);
            let queue_id = self.ctx.queue_id;
            self.runtime.spawn(async move {
                for (key, joined) in join_all(tasks).await {
                    if let Err(e) = joined {
                        error!(%queue_id, key = ?key, error = %e, "worker ended abnormally");
                    }
                }
                registry.mark_drained();
                info!(%queue_id, "shutdown complete");
            });
        }

        // Only fails if the registry is gone, which cannot happen while
        // `self` holds it.
        let _ = drained.wait_for(|done| *done).await;
    }

    pub fn is_shutting_down(&self) -> bool {
        self.registry.is_closed()
    }

    /// Number of keys that currently have a live worker.
    pub fn live_keys(&self) -> usize {
        self.registry.live_keys()
    }

    pub fn stats(&self) -> QueueStats {
        self.ctx
            .counters
            .snapshot(self.ctx.queue_id, self.registry.live_keys())
    }
}
