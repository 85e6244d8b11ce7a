use crate::channel::{WorkItem, WorkerEnd};
use crate::error::PoolError;
use crate::notifier::{CompletionNotifier, InternalCompletionMessage, TaskCompletionStatus};
use crate::task::{Task, TaskLabel, TaskReport};

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use dashmap::DashMap;
use tracing::{debug, error, info, info_span, trace, warn};

/// One worker, bound to its endpoint of the channel pair for its entire
/// lifetime. The loop pulls work items until it sees a stop sentinel or the
/// pending queue disconnects.
pub(crate) struct Worker<R: Send + 'static> {
  pub(crate) index: usize,
  pub(crate) pool_name: Arc<String>,
  pub(crate) end: WorkerEnd<R>,
  /// Shared registry of tasks currently executing, keyed by task ID. The
  /// value is `(worker index, label)`, which lets the coordinator name the
  /// tasks a dead worker took down with it.
  pub(crate) in_flight: Arc<DashMap<u64, (usize, Option<TaskLabel>)>>,
  pub(crate) notifier: Arc<CompletionNotifier>,
}

impl<R: Send + 'static> Worker<R> {
  /// Spawns the worker on a named OS thread and returns its join handle.
  pub(crate) fn spawn(self, stack_size: Option<usize>) -> std::io::Result<JoinHandle<()>> {
    let mut builder = thread::Builder::new().name(format!("{}-worker-{}", self.pool_name, self.index));
    if let Some(bytes) = stack_size {
      builder = builder.stack_size(bytes);
    }
    builder.spawn(move || self.run())
  }

  fn run(self) {
    let span = info_span!("worker_loop", pool_name = %*self.pool_name, worker = self.index);
    let _entered = span.entered();
    info!("Worker started.");

    loop {
      let item = match self.end.recv_item() {
        Ok(item) => item,
        Err(_) => {
          // The coordinator endpoint vanished without sending a sentinel.
          info!("Pending queue disconnected. Worker loop terminating.");
          break;
        }
      };

      match item {
        WorkItem::Stop => {
          info!("Stop signal received. Worker loop terminating.");
          break;
        }
        WorkItem::Run(task) => self.execute(task),
      }
    }

    info!("Worker loop stopped.");
  }

  fn execute(&self, task: Task<R>) {
    let task_id = task.task_id;
    let label = task.label.clone();
    debug!(%task_id, label = ?label, "Dequeued task. Executing.");

    self.in_flight.insert(task_id, (self.index, label.clone()));

    let work = task.work;
    let outcome = match panic::catch_unwind(AssertUnwindSafe(move || work())) {
      Ok(value) => {
        trace!(%task_id, "Task executed successfully.");
        Ok(value)
      }
      Err(payload) => {
        let message = panic_message(payload.as_ref());
        error!(%task_id, panic_message = %message, "Task panicked during execution.");
        Err(PoolError::TaskPanicked(message))
      }
    };

    // Publish before delivering the report so that by the time the
    // coordinator sees the report, the notification is already in flight.
    self.notifier.publish(InternalCompletionMessage {
      task_id,
      pool_name: self.pool_name.clone(),
      label: label.clone(),
      status: TaskCompletionStatus::from(&outcome),
    });

    // Deregister before delivering: once the coordinator can observe the
    // report, the task must no longer count as in flight.
    self.in_flight.remove(&task_id);

    let report = TaskReport {
      task_id,
      label,
      outcome,
    };
    if !self.end.send_report(report) {
      warn!(%task_id, "Completed queue receiver is gone. Task report dropped.");
    }
  }
}

/// Renders a panic payload for the fault report. Payloads raised via
/// `panic!` are `&str` or `String`; anything else is opaque.
fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "opaque panic payload".to_string()
  }
}
