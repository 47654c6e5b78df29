//! Queue configuration, fixed at construction.

use crate::error::{Error, Result};
use std::time::Duration;

/// Batching parameters shared by every per-key worker of one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Upper bound on items per batch. Must be > 0.
    pub max_batch_size: usize,
    /// Longest an item waits in a collecting window before a flush. Must be > 0.
    pub max_wait: Duration,
    /// Tear down a key's worker after it has been idle this long.
    /// `None` keeps every worker alive until shutdown.
    pub idle_timeout: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            max_wait: Duration::from_millis(250),
            idle_timeout: None,
        }
    }
}

impl QueueConfig {
    pub fn new(max_batch_size: usize, max_wait: Duration) -> Self {
        Self {
            max_batch_size,
            max_wait,
            idle_timeout: None,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }

    /// Reject configurations the scheduler cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(Error::InvalidConfig(
                "max_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.max_wait.is_zero() {
            return Err(Error::InvalidConfig(
                "max_wait must be greater than zero".to_string(),
            ));
        }
        if self.idle_timeout.is_some_and(|d| d.is_zero()) {
            return Err(Error::InvalidConfig(
                "idle_timeout must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }
}
