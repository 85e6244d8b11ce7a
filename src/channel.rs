use crate::error::PoolError;
use crate::task::{Task, TaskReport};

use std::fmt;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError};

/// An item on the pending queue: either a task to execute or the sentinel
/// telling exactly one worker to stop.
pub(crate) enum WorkItem<R: Send + 'static> {
  Run(Task<R>),
  Stop,
}

impl<R: Send + 'static> fmt::Debug for WorkItem<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      WorkItem::Run(task) => f.debug_tuple("Run").field(task).finish(),
      WorkItem::Stop => write!(f, "Stop"),
    }
  }
}

/// The two unbounded FIFO queues one pool run is built around: pending work
/// flowing coordinator-to-workers, completed reports flowing back.
pub(crate) struct ChannelPair<R: Send + 'static> {
  pending_tx: Sender<WorkItem<R>>,
  pending_rx: Receiver<WorkItem<R>>,
  completed_tx: Sender<TaskReport<R>>,
  completed_rx: Receiver<TaskReport<R>>,
}

impl<R: Send + 'static> ChannelPair<R> {
  pub(crate) fn new() -> Self {
    let (pending_tx, pending_rx) = crossbeam_channel::unbounded();
    let (completed_tx, completed_rx) = crossbeam_channel::unbounded();
    Self {
      pending_tx,
      pending_rx,
      completed_tx,
      completed_rx,
    }
  }

  /// Splits the pair into its coordinator endpoint and its worker endpoint.
  ///
  /// The worker endpoint is cloned once per worker; the coordinator endpoint
  /// cannot be cloned, so the pending queue keeps a single producer and the
  /// completed queue a single consumer.
  pub(crate) fn split(self) -> (PoolEnd<R>, WorkerEnd<R>) {
    (
      PoolEnd {
        pending_tx: self.pending_tx,
        completed_rx: self.completed_rx,
      },
      WorkerEnd {
        pending_rx: self.pending_rx,
        completed_tx: self.completed_tx,
      },
    )
  }
}

/// The coordinator's side: enqueue work items, drain completed reports.
pub(crate) struct PoolEnd<R: Send + 'static> {
  pending_tx: Sender<WorkItem<R>>,
  completed_rx: Receiver<TaskReport<R>>,
}

impl<R: Send + 'static> PoolEnd<R> {
  /// Enqueues one task behind everything already queued.
  pub(crate) fn send_task(&self, task: Task<R>) -> Result<(), PoolError> {
    self
      .pending_tx
      .send(WorkItem::Run(task))
      .map_err(|e| PoolError::QueueSendError(e.to_string()))
  }

  /// Enqueues one stop sentinel. It queues behind any pending tasks, so a
  /// worker only observes it once the backlog ahead of it is drained.
  pub(crate) fn send_stop(&self) -> Result<(), PoolError> {
    self
      .pending_tx
      .send(WorkItem::Stop)
      .map_err(|e| PoolError::QueueSendError(e.to_string()))
  }

  /// Blocks until a report arrives. `Err` means every worker endpoint is
  /// gone and the queue is fully drained.
  pub(crate) fn recv_report(&self) -> Result<TaskReport<R>, RecvError> {
    self.completed_rx.recv()
  }

  /// Blocks for at most `timeout` waiting for a report.
  pub(crate) fn recv_report_timeout(&self, timeout: Duration) -> Result<TaskReport<R>, RecvTimeoutError> {
    self.completed_rx.recv_timeout(timeout)
  }

  /// Non-blocking receive. `Empty` and `Disconnected` are distinct: the
  /// former means no report yet with workers still attached, the latter that
  /// nothing further can ever arrive.
  pub(crate) fn try_recv_report(&self) -> Result<TaskReport<R>, TryRecvError> {
    self.completed_rx.try_recv()
  }

  /// Number of items (tasks and sentinels) currently in the pending queue.
  pub(crate) fn pending_len(&self) -> usize {
    self.pending_tx.len()
  }
}

impl<R: Send + 'static> fmt::Debug for PoolEnd<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PoolEnd")
      .field("pending_len", &self.pending_tx.len())
      .field("completed_len", &self.completed_rx.len())
      .finish()
  }
}

/// A worker's side: dequeue work items, push completed reports back.
pub(crate) struct WorkerEnd<R: Send + 'static> {
  pending_rx: Receiver<WorkItem<R>>,
  completed_tx: Sender<TaskReport<R>>,
}

// Manual impl: a derived Clone would demand `R: Clone`, which the channel
// endpoints do not need.
impl<R: Send + 'static> Clone for WorkerEnd<R> {
  fn clone(&self) -> Self {
    Self {
      pending_rx: self.pending_rx.clone(),
      completed_tx: self.completed_tx.clone(),
    }
  }
}

impl<R: Send + 'static> WorkerEnd<R> {
  /// Blocks until the next work item is available. `Err` means the
  /// coordinator endpoint is gone; workers treat that like a stop.
  pub(crate) fn recv_item(&self) -> Result<WorkItem<R>, RecvError> {
    self.pending_rx.recv()
  }

  /// Pushes one report onto the completed queue. Returns `false` when the
  /// coordinator endpoint is gone and the report had nowhere to go.
  pub(crate) fn send_report(&self, report: TaskReport<R>) -> bool {
    self.completed_tx.send(report).is_ok()
  }
}

impl<R: Send + 'static> fmt::Debug for WorkerEnd<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkerEnd")
      .field("pending_len", &self.pending_rx.len())
      .finish()
  }
}
