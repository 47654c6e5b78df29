//! Error types for batchq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid queue configuration: {0}")]
    InvalidConfig(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no tokio runtime available; construct the queue from within a runtime")]
    NoRuntime,

    #[error("queue is shutting down; offer rejected")]
    ShuttingDown,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
