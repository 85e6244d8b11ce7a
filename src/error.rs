use crate::task::TaskLabel;

use thiserror::Error;

/// Errors that can occur within a `threadmill` pool.
#[derive(Error, Debug, PartialEq)]
pub enum PoolError {
  #[error("Failed to submit task to the pool queue: {0}")]
  QueueSendError(String),

  #[error("Task panicked during execution: {0}")]
  TaskPanicked(String),

  #[error("A worker thread died without delivering its result; labels of lost tasks: {0:?}")]
  WorkerLost(Vec<TaskLabel>),

  #[error("Timed out draining results: expected {expected}, received {received}")]
  DrainTimeout { expected: usize, received: usize },

  #[error("Task result already taken or channel was not available")]
  ResultUnavailable,

  #[error("Pool is shutting down or already shut down, cannot accept new tasks")]
  PoolShuttingDown,
}
