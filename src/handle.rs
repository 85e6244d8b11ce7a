use crate::channel::{ChannelPair, PoolEnd};
use crate::error::PoolError;
use crate::notifier::CompletionNotifier;
use crate::task::{Task, TaskLabel, TaskReport};
use crate::worker::Worker;

use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::TryRecvError;
use dashmap::DashMap;
use tracing::{debug, info, warn};

/// The outcome of polling a [`BackgroundHandle`] without blocking.
#[derive(Debug)]
pub enum TaskPoll<R> {
  /// No report yet; the worker thread is alive and presumably still running
  /// the task. Poll again later.
  Pending,
  /// The task finished. The handle is consumed: the worker has been stopped
  /// and joined, and further polls return
  /// [`PoolError::ResultUnavailable`].
  Ready(TaskReport<R>),
  /// No report will ever arrive: the worker thread died without delivering
  /// one, or the handle was already consumed.
  Failed(PoolError),
}

impl<R> TaskPoll<R> {
  pub fn is_pending(&self) -> bool {
    matches!(self, TaskPoll::Pending)
  }

  pub fn is_ready(&self) -> bool {
    matches!(self, TaskPoll::Ready(_))
  }
}

/// A handle to a single task running on its own dedicated worker thread.
///
/// Created by [`submit_background`], which returns immediately after
/// enqueuing the task. The caller later retrieves the report either by
/// polling [`try_take`](Self::try_take) or by blocking on
/// [`take_blocking`](Self::take_blocking). Retrieval is single-shot: it stops
/// and joins the worker, and the handle is consumed.
///
/// Dropping an unconsumed handle queues the stop signal so the worker exits
/// once its in-flight task finishes; the drop itself never blocks.
pub struct BackgroundHandle<R: Send + 'static> {
  task_id: u64,
  label: Option<TaskLabel>,
  /// `None` once the report has been retrieved.
  pool_end: Option<PoolEnd<R>>,
  worker_handle: Option<JoinHandle<()>>,
}

/// Starts `task` on a freshly spawned single-worker pool and returns without
/// waiting for it.
///
/// This is the fire-and-forget counterpart of [`run_pool`](crate::run_pool):
/// the same channel pair and worker loop, degenerate to one worker and one
/// task. There is no built-in deadline; a caller wanting a maximum wait polls
/// [`BackgroundHandle::try_take`] in a loop against its own clock.
///
/// # Panics
/// Panics if the operating system refuses to spawn the worker thread.
pub fn submit_background<R: Send + 'static>(task: Task<R>) -> BackgroundHandle<R> {
  let task_id = task.task_id;
  let label = task.label.clone();

  let (pool_end, worker_end) = ChannelPair::new().split();
  // Enqueued before the worker spawns, so the loop finds it on first receive.
  if pool_end.send_task(task).is_err() {
    warn!(%task_id, "Pending queue rejected the background task before the worker started.");
  }

  let pool_name = Arc::new(format!("background-{task_id}"));
  let worker = Worker {
    index: 0,
    pool_name: pool_name.clone(),
    end: worker_end,
    in_flight: Arc::new(DashMap::new()),
    notifier: CompletionNotifier::new(pool_name.clone()),
  };
  let worker_handle = worker.spawn(None).expect("failed to spawn background worker thread");

  info!(%task_id, label = ?label, "Background task submitted.");

  BackgroundHandle {
    task_id,
    label,
    pool_end: Some(pool_end),
    worker_handle: Some(worker_handle),
  }
}

impl<R: Send + 'static> BackgroundHandle<R> {
  /// Returns the unique ID of the task behind this handle.
  pub fn id(&self) -> u64 {
    self.task_id
  }

  /// The task's label, if any.
  pub fn label(&self) -> Option<&str> {
    self.label.as_deref()
  }

  /// Attempts to retrieve the task's report without blocking.
  ///
  /// The three cases are distinct on purpose: a quiet queue with a live
  /// worker is the normal "still running" condition, while a quiet queue
  /// with a dead worker means the report can never arrive and waiting any
  /// longer would be futile.
  pub fn try_take(&mut self) -> TaskPoll<R> {
    let Some(pool_end) = self.pool_end.as_ref() else {
      return TaskPoll::Failed(PoolError::ResultUnavailable);
    };

    match pool_end.try_recv_report() {
      Ok(report) => {
        debug!(task_id = self.task_id, "Background task report retrieved on poll.");
        self.finish();
        TaskPoll::Ready(report)
      }
      Err(TryRecvError::Empty) => {
        let worker_alive = self
          .worker_handle
          .as_ref()
          .map_or(false, |handle| !handle.is_finished());
        if worker_alive {
          debug!(task_id = self.task_id, "Background task still running.");
          TaskPoll::Pending
        } else {
          warn!(task_id = self.task_id, "Background worker thread is no longer alive; its report will never arrive.");
          TaskPoll::Failed(PoolError::WorkerLost(self.lost_labels()))
        }
      }
      Err(TryRecvError::Disconnected) => {
        warn!(task_id = self.task_id, "Background worker thread exited without delivering a report.");
        TaskPoll::Failed(PoolError::WorkerLost(self.lost_labels()))
      }
    }
  }

  /// Blocks until the task's report is available and returns it.
  ///
  /// Consumes the handle, so the single-shot contract holds structurally on
  /// this path. Returns [`PoolError::WorkerLost`] if the worker thread dies
  /// without delivering, and [`PoolError::ResultUnavailable`] if the report
  /// was already taken by an earlier [`try_take`](Self::try_take).
  pub fn take_blocking(mut self) -> Result<TaskReport<R>, PoolError> {
    let Some(pool_end) = self.pool_end.as_ref() else {
      return Err(PoolError::ResultUnavailable);
    };

    debug!(task_id = self.task_id, "Blocking until the background task reports.");
    match pool_end.recv_report() {
      Ok(report) => {
        self.finish();
        Ok(report)
      }
      Err(_) => {
        warn!(task_id = self.task_id, "Background worker thread exited without delivering a report.");
        let labels = self.lost_labels();
        self.pool_end = None;
        Err(PoolError::WorkerLost(labels))
      }
    }
  }

  /// Stops and joins the worker after a successful retrieval. The worker is
  /// idle by now (it delivered the report before blocking on its next
  /// receive), so the join is prompt.
  fn finish(&mut self) {
    if let Some(pool_end) = self.pool_end.take() {
      if pool_end.send_stop().is_err() {
        debug!(task_id = self.task_id, "Worker already gone; no stop signal needed.");
      }
    }
    if let Some(handle) = self.worker_handle.take() {
      if handle.join().is_err() {
        warn!(task_id = self.task_id, "Background worker thread panicked before joining.");
      }
    }
  }

  fn lost_labels(&self) -> Vec<TaskLabel> {
    vec![self.label.clone().unwrap_or_else(|| format!("#{}", self.task_id))]
  }
}

impl<R: Send + 'static> fmt::Debug for BackgroundHandle<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BackgroundHandle")
      .field("task_id", &self.task_id)
      .field("label", &self.label)
      .field("consumed", &self.pool_end.is_none())
      .finish()
  }
}

impl<R: Send + 'static> Drop for BackgroundHandle<R> {
  fn drop(&mut self) {
    if let Some(pool_end) = self.pool_end.take() {
      debug!(task_id = self.task_id, "BackgroundHandle dropped without retrieval. Queuing stop signal without waiting for worker exit.");
      let _ = pool_end.send_stop();
    }
    // The worker thread exits on its own after the stop signal; Drop never
    // joins it.
  }
}
