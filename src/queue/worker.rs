//! Per-key worker: the batch scheduler loop for one partition key.
//!
//! ```text
//! Idle ──item──▶ Collecting ──size | max_wait──▶ Flushing ──▶ Idle
//!   │                 │
//!   └──channel closed─┴──▶ Draining ──▶ Terminated
//! ```
//!
//! The worker owns the receiving half of its key's channel. Producers keep
//! sending while a batch is in flight; those items form the next window.

use crate::model::{Batch, FlushTrigger, Keyed};
use crate::processor::{BatchFailure, BatchProcessor, ErrorSink, FailureCause};
use crate::queue::config::QueueConfig;
use crate::stats::Counters;
use crate::telemetry::batch::{record_batch_outcome, start_batch_span};
use crate::telemetry::metrics::QueueMetrics;
use futures::FutureExt as _;
use opentelemetry::KeyValue;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, warn};
use uuid::Uuid;

use super::registry::Registry;

/// An accepted item, stamped with when it was offered.
pub(crate) struct Envelope<T> {
    item: T,
    offered_at: Instant,
}

impl<T> Envelope<T> {
    pub fn new(item: T) -> Self {
        Self {
            item,
            offered_at: Instant::now(),
        }
    }
}

/// Everything a worker needs that is shared by all workers of one queue.
pub(crate) struct WorkerContext<T: Keyed, P: BatchProcessor<T>> {
    pub queue_id: Uuid,
    pub config: QueueConfig,
    pub processor: P,
    pub error_sink: Option<ErrorSink<T::Key, P::Error>>,
    pub counters: Counters,
    pub metrics: QueueMetrics,
}

/// What ended an idle wait.
enum Wake<T> {
    Item(Envelope<T>),
    Closed,
    Evicted,
}

pub(crate) struct Worker<T: Keyed, P: BatchProcessor<T>> {
    id: u64,
    key: T::Key,
    rx: UnboundedReceiver<Envelope<T>>,
    ctx: Arc<WorkerContext<T, P>>,
    registry: Weak<Registry<T>>,
    buffer: Vec<T>,
    seq: u64,
}

impl<T: Keyed, P: BatchProcessor<T>> Worker<T, P> {
    pub fn new(
        id: u64,
        key: T::Key,
        rx: UnboundedReceiver<Envelope<T>>,
        ctx: Arc<WorkerContext<T, P>>,
        registry: Weak<Registry<T>>,
    ) -> Self {
        Self {
            id,
            key,
            rx,
            ctx,
            registry,
            buffer: Vec::new(),
            seq: 0,
        }
    }

    pub async fn run(mut self) {
        debug!(
            queue_id = %self.ctx.queue_id,
            key = ?self.key,
            worker_id = self.id,
            "worker started"
        );

        let reason = loop {
            let first = match self.wait_idle().await {
                Wake::Item(envelope) => envelope,
                Wake::Closed => break "drained",
                Wake::Evicted => break "idle",
            };

            // After shutdown, items beyond a full chunk stay in the closed
            // channel until the next idle wait, which reports `Closed` once
            // it is empty.
            let trigger = self.collect(first).await;
            self.flush(trigger).await;
        };

        self.ctx
            .metrics
            .workers_stopped
            .add(1, &[KeyValue::new("reason", reason)]);
        debug!(
            queue_id = %self.ctx.queue_id,
            key = ?self.key,
            worker_id = self.id,
            batches = self.seq,
            reason,
            "worker stopped"
        );
    }

    /// Park until the next item arrives, the channel closes, or the worker
    /// is evicted after its idle timeout.
    async fn wait_idle(&mut self) -> Wake<T> {
        let Some(idle_timeout) = self.ctx.config.idle_timeout else {
            return match self.rx.recv().await {
                Some(envelope) => Wake::Item(envelope),
                None => Wake::Closed,
            };
        };

        loop {
            match tokio::time::timeout(idle_timeout, self.rx.recv()).await {
                Ok(Some(envelope)) => return Wake::Item(envelope),
                Ok(None) => return Wake::Closed,
                Err(_) if self.try_evict() => return Wake::Evicted,
                Err(_) => continue,
            }
        }
    }

    fn try_evict(&self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let evicted = registry.evict_if_idle(&self.key, self.id, &self.rx);
        if evicted {
            Counters::add(&self.ctx.counters.workers_evicted, 1);
        }
        evicted
    }

    /// Accumulate one window, starting with `first`, until a flush trigger.
    ///
    /// The deadline is `max_wait` after `first` was offered and is not
    /// extended by later arrivals. Once the channel is closed every window
    /// is a drain, whether it fills up or not.
    async fn collect(&mut self, first: Envelope<T>) -> FlushTrigger {
        let max_batch_size = self.ctx.config.max_batch_size;
        let deadline = first
            .offered_at
            .checked_add(self.ctx.config.max_wait)
            .unwrap_or_else(far_future);
        self.buffer.push(first.item);

        while self.buffer.len() < max_batch_size {
            tokio::select! {
                biased;
                received = self.rx.recv() => match received {
                    Some(envelope) => self.buffer.push(envelope.item),
                    None => return FlushTrigger::Drain,
                },
                () = tokio::time::sleep_until(deadline) => return FlushTrigger::Timeout,
            }
        }
        if self.rx.is_closed() {
            FlushTrigger::Drain
        } else {
            FlushTrigger::Size
        }
    }

    /// Hand the buffered window to the processor and wait for it to finish.
    async fn flush(&mut self, trigger: FlushTrigger) {
        if self.buffer.is_empty() {
            return;
        }
        self.seq += 1;
        let seq = self.seq;
        let batch = Batch {
            key: self.key.clone(),
            seq,
            trigger,
            items: std::mem::take(&mut self.buffer),
        };
        let batch_len = batch.len();

        let ctx = &self.ctx;
        let span = start_batch_span(&ctx.queue_id, &self.key, seq, batch_len, trigger);
        ctx.metrics
            .batches_dispatched
            .add(1, &[KeyValue::new("trigger", trigger.as_str())]);
        ctx.metrics.batch_size.record(batch_len as u64, &[]);
        Counters::add(&ctx.counters.batches_dispatched, 1);
        debug!(
            queue_id = %ctx.queue_id,
            key = ?self.key,
            seq,
            batch_len,
            trigger = trigger.as_str(),
            "dispatching batch"
        );

        let started = std::time::Instant::now();
        // `process` is called inside the guarded future so a panic before its
        // future exists is contained too.
        let call = async move { ctx.processor.process(batch).await };
        let outcome = AssertUnwindSafe(call.instrument(span.clone()))
            .catch_unwind()
            .await;
        ctx.metrics
            .batch_duration_ms
            .record(started.elapsed().as_secs_f64() * 1000.0, &[]);

        let cause = match outcome {
            Ok(Ok(())) => {
                record_batch_outcome(&span, "ok");
                Counters::add(&ctx.counters.items_processed, batch_len);
                return;
            }
            Ok(Err(e)) => FailureCause::Error(e),
            Err(panic) => FailureCause::Panic(panic_message(panic.as_ref())),
        };
        self.report_failure(seq, batch_len, cause, &span);
    }

    fn report_failure(
        &self,
        seq: u64,
        batch_len: usize,
        cause: FailureCause<P::Error>,
        span: &tracing::Span,
    ) {
        let ctx = &self.ctx;
        record_batch_outcome(span, cause.as_str());
        Counters::add(&ctx.counters.batches_failed, 1);
        Counters::add(&ctx.counters.items_failed, batch_len);
        ctx.metrics
            .batches_failed
            .add(1, &[KeyValue::new("cause", cause.as_str())]);
        span.in_scope(|| {
            warn!(
                queue_id = %ctx.queue_id,
                key = ?self.key,
                seq,
                batch_len,
                error = %cause,
                "batch failed"
            );
        });

        if let Some(sink) = &ctx.error_sink {
            let failure = BatchFailure {
                key: self.key.clone(),
                seq,
                batch_len,
                cause,
            };
            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| sink(failure))) {
                error!(
                    queue_id = %ctx.queue_id,
                    key = ?self.key,
                    seq,
                    panic = %panic_message(panic.as_ref()),
                    "error sink panicked"
                );
            }
        }
    }
}

/// Stand-in deadline for a `max_wait` too large to add to an `Instant`.
fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365 * 30)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
