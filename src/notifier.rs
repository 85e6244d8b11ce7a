use crate::error::PoolError;
use crate::task::TaskLabel;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Once};
use std::thread::{self, JoinHandle};
use std::time::SystemTime;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

// --- Public Event Structs for Handlers ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskCompletionStatus {
  Success,
  Panicked,
  PoolErrorOccurred,
}

impl<R> From<&Result<R, PoolError>> for TaskCompletionStatus {
  fn from(result: &Result<R, PoolError>) -> Self {
    match result {
      Ok(_) => TaskCompletionStatus::Success,
      Err(PoolError::TaskPanicked(_)) => TaskCompletionStatus::Panicked,
      Err(_) => TaskCompletionStatus::PoolErrorOccurred,
    }
  }
}

#[derive(Debug, Clone)]
pub struct TaskCompletionInfo {
  pub task_id: u64,
  pub pool_name: Arc<String>,
  pub label: Option<TaskLabel>,
  pub status: TaskCompletionStatus,
  pub completion_time: SystemTime,
}

// --- Internal Message (crate-public) ---
#[derive(Debug)]
pub(crate) struct InternalCompletionMessage {
  pub(crate) task_id: u64,
  pub(crate) pool_name: Arc<String>,
  pub(crate) label: Option<TaskLabel>,
  pub(crate) status: TaskCompletionStatus,
}

// --- CompletionNotifier Struct ---

type HandlerList = Arc<RwLock<Vec<Arc<dyn Fn(TaskCompletionInfo) + Send + Sync + 'static>>>>;

struct NotifierInternalState {
  /// Receiver parked here until the first handler registration spawns the
  /// notification thread, which takes it.
  rx_for_init: Option<Receiver<InternalCompletionMessage>>,
  /// Sole sender. Dropping it is the shutdown signal for the notification
  /// thread: the queue disconnects once drained.
  tx: Option<Sender<InternalCompletionMessage>>,
  pool_name_for_logging: Arc<String>,
  worker_join_handle: Option<JoinHandle<()>>,
}

/// Fan-out of task completion events to registered handlers.
///
/// The notification thread is lazy: it only starts when the first handler is
/// added. Completions published before that are dropped, so handlers only
/// ever observe tasks that finished after registration.
pub(crate) struct CompletionNotifier {
  handlers: HandlerList,
  init_once: Once,
  internal_state: Mutex<NotifierInternalState>,
}

impl fmt::Debug for CompletionNotifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let handler_count = self.handlers.try_read().map_or(0, |guard| guard.len());
    f.debug_struct("CompletionNotifier")
      .field("handler_count", &handler_count)
      .field("initialized", &self.init_once.is_completed())
      .finish()
  }
}

impl CompletionNotifier {
  pub(crate) fn new(pool_name_for_logging: Arc<String>) -> Arc<Self> {
    let (tx, rx) = crossbeam_channel::unbounded();
    Arc::new(Self {
      handlers: Arc::new(RwLock::new(Vec::new())),
      init_once: Once::new(),
      internal_state: Mutex::new(NotifierInternalState {
        rx_for_init: Some(rx),
        tx: Some(tx),
        pool_name_for_logging,
        worker_join_handle: None,
      }),
    })
  }

  fn ensure_worker_initialized(&self) {
    self.init_once.call_once(|| {
      let mut state_guard = self.internal_state.lock();
      if let Some(rx_to_use) = state_guard.rx_for_init.take() {
        info!(pool_name = %*state_guard.pool_name_for_logging, "First completion handler added. Initializing notification worker.");

        let worker_handlers = self.handlers.clone();
        let thread_name = format!("{}-notifier", state_guard.pool_name_for_logging);
        let worker_jh = thread::Builder::new()
          .name(thread_name)
          .spawn(move || Self::run_notification_worker_loop(rx_to_use, worker_handlers))
          .expect("failed to spawn notification worker thread");
        state_guard.worker_join_handle = Some(worker_jh);
      } else {
        warn!(pool_name = %*state_guard.pool_name_for_logging, "Notifier initialization: RX already taken, worker might have been initialized concurrently (unexpected with Once).");
      }
    });
  }

  pub(crate) fn add_handler(&self, handler: impl Fn(TaskCompletionInfo) + Send + Sync + 'static) {
    self.ensure_worker_initialized();

    let pool_name_for_logging = {
      let state_guard = self.internal_state.lock();
      state_guard.pool_name_for_logging.clone()
    };

    let mut handlers_guard = self.handlers.write();
    handlers_guard.push(Arc::new(handler));
    info!(pool_name = %*pool_name_for_logging, "Notifier: Added new completion handler. Total handlers: {}", handlers_guard.len());
  }

  /// Hands one completion message to the notification thread.
  ///
  /// Called from worker threads. When no handler was ever registered there
  /// is no thread draining the queue, so the message is dropped instead of
  /// accumulating unread.
  pub(crate) fn publish(&self, message: InternalCompletionMessage) {
    if !self.init_once.is_completed() {
      trace!(task_id = message.task_id, "No notification worker active, dropping completion message.");
      return;
    }

    let state_guard = self.internal_state.lock();
    match state_guard.tx.as_ref() {
      Some(tx) => {
        if tx.send(message).is_err() {
          warn!("Notification queue disconnected, dropping completion message.");
        }
      }
      None => {
        trace!("Notifier already shut down, dropping completion message.");
      }
    }
  }

  fn run_notification_worker_loop(queue_rx: Receiver<InternalCompletionMessage>, handlers_list: HandlerList) {
    info!("Notification worker started. Will process messages until its input queue is closed by all senders.");

    while let Ok(message) = queue_rx.recv() {
      trace!(task_id = message.task_id, "Notification worker: processing message.");

      let handlers_snapshot: Vec<_> = handlers_list.read().iter().cloned().collect();
      if handlers_snapshot.is_empty() {
        trace!(task_id = message.task_id, "No completion handlers registered, dropping notification.");
        continue;
      }

      let InternalCompletionMessage {
        task_id,
        pool_name,
        label,
        status,
      } = message;
      let public_info = TaskCompletionInfo {
        task_id,
        pool_name,
        label,
        status,
        completion_time: SystemTime::now(),
      };

      debug!(
        task_id = public_info.task_id,
        "Dispatching notification to {} handlers.",
        handlers_snapshot.len()
      );

      for handler in handlers_snapshot {
        let info_for_handler = public_info.clone();
        let result = panic::catch_unwind(AssertUnwindSafe(|| handler(info_for_handler)));
        if result.is_err() {
          error!(
            task_id = public_info.task_id,
            pool_name = %*public_info.pool_name,
            "A completion handler panicked during dispatch."
          );
        }
      }
    }

    info!("Notification worker stopped (input queue fully closed and processed).");
  }

  /// Closes the queue and joins the notification thread, guaranteeing every
  /// already-published message was dispatched before this returns.
  pub(crate) fn shutdown(&self) {
    let (tx, handle_option, pool_name) = {
      let mut guard = self.internal_state.lock();
      (guard.tx.take(), guard.worker_join_handle.take(), guard.pool_name_for_logging.clone())
    };
    drop(tx);

    if let Some(handle) = handle_option {
      info!(pool_name = %*pool_name, "Notifier: Waiting for notification worker loop to join.");
      if handle.join().is_err() {
        error!(pool_name = %*pool_name, "Notifier: Notification worker panicked before joining.");
      } else {
        debug!(pool_name = %*pool_name, "Notifier: Notification worker loop successfully joined.");
      }
    } else {
      trace!(pool_name = %*pool_name, "Notifier: Worker was not initialized or handle already taken; no join needed.");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_maps_outcomes_for_handlers() {
    let success: Result<u32, PoolError> = Ok(5);
    assert_eq!(TaskCompletionStatus::from(&success), TaskCompletionStatus::Success);

    let panicked: Result<u32, PoolError> = Err(PoolError::TaskPanicked("boom".to_string()));
    assert_eq!(TaskCompletionStatus::from(&panicked), TaskCompletionStatus::Panicked);

    let other: Result<u32, PoolError> = Err(PoolError::ResultUnavailable);
    assert_eq!(TaskCompletionStatus::from(&other), TaskCompletionStatus::PoolErrorOccurred);
  }

  #[test]
  fn test_publish_without_handlers_is_dropped() {
    let notifier = CompletionNotifier::new(Arc::new("drop-test".to_string()));
    // No handler registered, so no worker thread exists to drain this.
    notifier.publish(InternalCompletionMessage {
      task_id: 1,
      pool_name: Arc::new("drop-test".to_string()),
      label: None,
      status: TaskCompletionStatus::Success,
    });
    // The message must not sit in the queue waiting for a worker.
    let state = notifier.internal_state.lock();
    assert_eq!(state.rx_for_init.as_ref().map(|rx| rx.len()), Some(0));
  }

  #[test]
  fn test_shutdown_without_initialization_is_a_noop() {
    let notifier = CompletionNotifier::new(Arc::new("noop-shutdown".to_string()));
    notifier.shutdown();
    notifier.shutdown();
  }
}
