use crate::error::PoolError;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

lazy_static::lazy_static! {
  static ref NEXT_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// A descriptive label for a task, typically a `String`.
pub type TaskLabel = String;

/// The type of closure that the pool executes.
/// It must be `Send` and `'static`, and produce a result of type `R`.
pub type TaskFn<R> = Box<dyn FnOnce() -> R + Send + 'static>;

/// One unit of work: a closure plus an optional label.
///
/// Arguments are captured by the closure at construction time; large
/// read-only inputs are best captured as `Arc` clones so every task shares
/// one buffer. Each task is executed exactly once, by exactly one worker.
pub struct Task<R: Send + 'static> {
  pub(crate) task_id: u64,
  pub(crate) label: Option<TaskLabel>,
  pub(crate) work: TaskFn<R>,
}

impl<R: Send + 'static> Task<R> {
  /// Creates an unlabeled task from a closure.
  pub fn new(work: impl FnOnce() -> R + Send + 'static) -> Self {
    Self::from_fn(Box::new(work))
  }

  /// Creates an unlabeled task from an already boxed payload, as produced
  /// when payloads are assembled dynamically.
  pub fn from_fn(work: TaskFn<R>) -> Self {
    Self {
      task_id: NEXT_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed),
      label: None,
      work,
    }
  }

  /// Creates a labeled task. The label travels with the task and comes back
  /// verbatim on its [`TaskReport`], which is how callers correlate results
  /// with inputs when completion order differs from submission order.
  pub fn labeled(label: impl Into<TaskLabel>, work: impl FnOnce() -> R + Send + 'static) -> Self {
    let mut task = Self::new(work);
    task.label = Some(label.into());
    task
  }

  /// The process-wide unique ID assigned at construction.
  pub fn id(&self) -> u64 {
    self.task_id
  }

  /// The label, if any.
  pub fn label(&self) -> Option<&str> {
    self.label.as_deref()
  }
}

impl<R: Send + 'static> fmt::Debug for Task<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Task")
      .field("task_id", &self.task_id)
      .field("label", &self.label)
      .finish_non_exhaustive()
  }
}

/// The record a worker produces for one executed task.
///
/// Reports surface in completion order, not submission order, so positional
/// matching against the submitted list is meaningless; correlate on `label`
/// or `task_id` instead.
#[derive(Debug)]
pub struct TaskReport<R> {
  pub task_id: u64,
  pub label: Option<TaskLabel>,
  pub outcome: Result<R, PoolError>,
}

impl<R> TaskReport<R> {
  /// Consumes the report, yielding the task's outcome.
  pub fn into_outcome(self) -> Result<R, PoolError> {
    self.outcome
  }

  /// Returns `true` if the task ran to completion without panicking.
  pub fn is_ok(&self) -> bool {
    self.outcome.is_ok()
  }
}
