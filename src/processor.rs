//! The processing seam: what the queue calls with each batch, and what it
//! reports when that call fails.

use crate::model::{Batch, Keyed};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Consumes batches cut by the queue.
///
/// Any `Fn(Batch<T>) -> impl Future<Output = Result<(), E>>` closure is a
/// processor, so most callers never implement this directly.
pub trait BatchProcessor<T: Keyed>: Send + Sync + 'static {
    type Error: fmt::Display + Send + 'static;

    fn process(&self, batch: Batch<T>) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

impl<T, F, Fut, E> BatchProcessor<T> for F
where
    T: Keyed,
    F: Fn(Batch<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    type Error = E;

    fn process(&self, batch: Batch<T>) -> impl Future<Output = Result<(), E>> + Send {
        self(batch)
    }
}

/// Why a batch failed.
#[derive(Debug)]
pub enum FailureCause<E> {
    /// The processor returned an error.
    Error(E),
    /// The processor panicked. Holds the panic message when it was a string.
    Panic(String),
}

impl<E> FailureCause<E> {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Error(_) => "error",
            Self::Panic(_) => "panic",
        }
    }
}

impl<E: fmt::Display> fmt::Display for FailureCause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(e) => write!(f, "{e}"),
            Self::Panic(msg) => write!(f, "processor panicked: {msg}"),
        }
    }
}

/// A failed batch, as delivered to the error sink.
#[derive(Debug)]
pub struct BatchFailure<K, E> {
    pub key: K,
    pub seq: u64,
    pub batch_len: usize,
    pub cause: FailureCause<E>,
}

/// Dead-letter hook invoked once per failed batch.
pub type ErrorSink<K, E> = Arc<dyn Fn(BatchFailure<K, E>) + Send + Sync>;
