use crate::channel::{ChannelPair, PoolEnd};
use crate::error::PoolError;
use crate::notifier::{CompletionNotifier, TaskCompletionInfo};
use crate::task::{Task, TaskLabel, TaskReport};
use crate::worker::Worker;

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use dashmap::DashMap;
use tracing::{debug, error, info, trace, warn};

/// How long the drain loop waits on the completed queue before it re-checks
/// worker liveness and the optional drain deadline.
const LIVENESS_SWEEP_INTERVAL: Duration = Duration::from_millis(50);

/// Configures and builds a [`ThreadPoolManager`].
#[derive(Debug, Clone)]
pub struct PoolBuilder {
  worker_count: usize,
  pool_name: String,
  result_timeout: Option<Duration>,
  stack_size: Option<usize>,
}

impl PoolBuilder {
  /// Returns a builder with default values: one worker per logical CPU, the
  /// pool name `"threadmill"`, no drain deadline, and the platform default
  /// worker stack size.
  pub fn new() -> Self {
    Self {
      worker_count: num_cpus::get(),
      pool_name: "threadmill".to_string(),
      result_timeout: None,
      stack_size: None,
    }
  }

  /// Set the number of worker threads. Values below 1 are clamped to 1.
  pub fn worker_count(mut self, val: usize) -> Self {
    self.worker_count = val;
    self
  }

  /// Set the pool name, used for worker thread names and log fields.
  pub fn pool_name(mut self, val: impl Into<String>) -> Self {
    self.pool_name = val.into();
    self
  }

  /// Set a deadline for each [`ThreadPoolManager::collect`] call. When the
  /// deadline expires with reports still outstanding, `collect` returns
  /// [`PoolError::DrainTimeout`] instead of waiting further. Without one,
  /// `collect` waits as long as the workers stay alive.
  pub fn result_timeout(mut self, val: Duration) -> Self {
    self.result_timeout = Some(val);
    self
  }

  /// Set the stack size of the worker threads, in bytes.
  pub fn stack_size(mut self, val: usize) -> Self {
    self.stack_size = Some(val);
    self
  }

  /// Build the pool and spawn its worker threads.
  ///
  /// # Panics
  /// Panics if the operating system refuses to spawn a worker thread.
  pub fn build<R: Send + 'static>(self) -> ThreadPoolManager<R> {
    let worker_count = self.worker_count.max(1);
    let pool_name = Arc::new(self.pool_name);
    let (pool_end, worker_end) = ChannelPair::new().split();
    let in_flight = Arc::new(DashMap::new());
    let notifier = CompletionNotifier::new(pool_name.clone());

    let mut worker_handles = Vec::with_capacity(worker_count);
    for index in 0..worker_count {
      let worker = Worker {
        index,
        pool_name: pool_name.clone(),
        end: worker_end.clone(),
        in_flight: in_flight.clone(),
        notifier: notifier.clone(),
      };
      let handle = worker.spawn(self.stack_size).expect("failed to spawn worker thread");
      worker_handles.push(handle);
    }
    // The prototype endpoint is dropped here; only the workers hold the
    // completed queue's sender side now, so the queue disconnects once every
    // worker has exited.
    drop(worker_end);

    info!(pool_name = %*pool_name, worker_count, "Worker pool started.");

    ThreadPoolManager {
      pool_name,
      pool_end,
      worker_handles,
      in_flight,
      outstanding_tasks: HashMap::new(),
      undelivered: Vec::new(),
      notifier,
      result_timeout: self.result_timeout,
      submitted: 0,
      collected: 0,
      shutdown_initiated: false,
    }
  }
}

impl Default for PoolBuilder {
  fn default() -> Self {
    Self::new()
  }
}

/// The coordinator of a fixed-size pool of worker threads.
///
/// The manager is the sole producer on the pending queue and the sole
/// consumer of the completed queue. Tasks are offered to the workers in
/// submission order; reports come back in completion order, so callers
/// correlate them with inputs through the task label, never list position.
///
/// Teardown is two-phase: [`initiate_shutdown`](Self::initiate_shutdown)
/// queues one stop sentinel per worker behind any pending tasks, and
/// [`join`](Self::join) waits for every worker thread to exit. Dropping the
/// manager without `join` only signals the workers and never blocks.
pub struct ThreadPoolManager<R: Send + 'static> {
  pool_name: Arc<String>,
  pool_end: PoolEnd<R>,
  worker_handles: Vec<JoinHandle<()>>,
  /// Tasks currently executing, keyed by task ID; shared with the workers.
  in_flight: Arc<DashMap<u64, (usize, Option<TaskLabel>)>>,
  /// Every submitted task whose report has not been drained yet, queued
  /// tasks included. Names the casualties when every worker is gone.
  outstanding_tasks: HashMap<u64, Option<TaskLabel>>,
  /// Reports drained by a `collect` call that returned an error, held for
  /// the next call instead of being dropped.
  undelivered: Vec<TaskReport<R>>,
  notifier: Arc<CompletionNotifier>,
  result_timeout: Option<Duration>,
  submitted: usize,
  collected: usize,
  shutdown_initiated: bool,
}

impl<R: Send + 'static> ThreadPoolManager<R> {
  /// Creates a pool with `worker_count` workers (clamped to at least 1) and
  /// spawns them immediately. See [`PoolBuilder`] for the remaining knobs.
  pub fn new(worker_count: usize, pool_name: &str) -> Self {
    Self::builder().worker_count(worker_count).pool_name(pool_name).build()
  }

  pub fn builder() -> PoolBuilder {
    PoolBuilder::new()
  }

  pub fn name(&self) -> &str {
    &self.pool_name
  }

  /// The number of worker threads this pool was started with.
  pub fn worker_count(&self) -> usize {
    self.worker_handles.len()
  }

  /// The number of tasks currently being executed by a worker.
  pub fn active_task_count(&self) -> usize {
    self.in_flight.len()
  }

  /// The number of items sitting in the pending queue, waiting for a worker.
  pub fn queued_task_count(&self) -> usize {
    self.pool_end.pending_len()
  }

  /// The number of submitted tasks whose reports have not been collected yet.
  pub fn outstanding_count(&self) -> usize {
    self.submitted - self.collected
  }

  /// Enqueues one task behind everything already submitted.
  ///
  /// The task will be picked up by exactly one worker. Fails with
  /// [`PoolError::PoolShuttingDown`] once shutdown has been initiated.
  pub fn submit(&mut self, task: Task<R>) -> Result<(), PoolError> {
    if self.shutdown_initiated {
      warn!(pool_name = %*self.pool_name, task_id = task.task_id, "Submit: Attempted to submit task to a pool that is shutting down.");
      return Err(PoolError::PoolShuttingDown);
    }

    let task_id = task.task_id;
    let label = task.label.clone();
    debug!(pool_name = %*self.pool_name, task_id, label = ?label, "Submitting task to queue.");
    self.pool_end.send_task(task)?;
    self.submitted += 1;
    self.outstanding_tasks.insert(task_id, label);
    Ok(())
  }

  /// Drains one report per outstanding task and returns them in completion
  /// order.
  ///
  /// Blocks until every outstanding report has arrived. While waiting, the
  /// manager periodically sweeps worker liveness: if a worker thread has died
  /// with its task still marked in flight, that report can never arrive and
  /// `collect` returns [`PoolError::WorkerLost`] naming the lost tasks
  /// instead of waiting forever. When every worker is gone the error names
  /// everything still outstanding, queued tasks included. With a configured
  /// [`result_timeout`](PoolBuilder::result_timeout), an expired deadline
  /// yields [`PoolError::DrainTimeout`], whose counts say how far the drain
  /// got. Reports drained before an error return are retained and handed out
  /// by the next `collect` call, never dropped.
  pub fn collect(&mut self) -> Result<Vec<TaskReport<R>>, PoolError> {
    let expected = self.outstanding_count();
    if expected == 0 {
      return Ok(Vec::new());
    }

    debug!(pool_name = %*self.pool_name, expected, retained = self.undelivered.len(), "Draining task reports.");
    let deadline = self.result_timeout.map(|limit| Instant::now() + limit);
    let mut reports = mem::take(&mut self.undelivered);
    reports.reserve(expected - reports.len());

    while reports.len() < expected {
      let wait = match deadline {
        Some(deadline) => {
          let now = Instant::now();
          if now >= deadline {
            warn!(pool_name = %*self.pool_name, expected, received = reports.len(), "Timed out draining task reports.");
            let received = reports.len();
            self.undelivered = reports;
            return Err(PoolError::DrainTimeout { expected, received });
          }
          LIVENESS_SWEEP_INTERVAL.min(deadline - now)
        }
        None => LIVENESS_SWEEP_INTERVAL,
      };

      match self.pool_end.recv_report_timeout(wait) {
        Ok(report) => {
          trace!(pool_name = %*self.pool_name, task_id = report.task_id, "Drained task report.");
          self.outstanding_tasks.remove(&report.task_id);
          reports.push(report);
        }
        Err(RecvTimeoutError::Timeout) => {
          if self.worker_handles.iter().all(|handle| handle.is_finished()) {
            // Every worker has exited, so every report sender is gone and
            // nothing more can arrive after the buffered reports below.
            while let Ok(report) = self.pool_end.try_recv_report() {
              self.outstanding_tasks.remove(&report.task_id);
              reports.push(report);
            }
            if reports.len() < expected {
              let lost = self.all_outstanding_labels();
              error!(pool_name = %*self.pool_name, expected, received = reports.len(), lost_tasks = ?lost, "Every worker thread exited with reports still outstanding.");
              self.undelivered = reports;
              return Err(PoolError::WorkerLost(lost));
            }
            continue;
          }
          let lost = self.lost_task_labels();
          if !lost.is_empty() {
            error!(pool_name = %*self.pool_name, lost_tasks = ?lost, "A worker thread died mid-task; its reports will never arrive.");
            self.undelivered = reports;
            return Err(PoolError::WorkerLost(lost));
          }
          // Quiet queue with live workers: the payloads are still running.
        }
        Err(RecvTimeoutError::Disconnected) => {
          // No worker endpoint is left, so nothing outstanding can report
          // anymore: tasks stuck in the pending queue are as lost as the
          // in-flight ones.
          let lost = self.all_outstanding_labels();
          error!(pool_name = %*self.pool_name, expected, received = reports.len(), lost_tasks = ?lost, "Every worker thread exited with reports still outstanding.");
          self.undelivered = reports;
          return Err(PoolError::WorkerLost(lost));
        }
      }
    }

    self.collected += reports.len();
    Ok(reports)
  }

  /// Registers a handler invoked once per finished task, from a dedicated
  /// notification thread. See [`TaskCompletionInfo`].
  pub fn add_completion_handler(&self, handler: impl Fn(TaskCompletionInfo) + Send + Sync + 'static) {
    self.notifier.add_handler(handler);
  }

  /// Queues one stop sentinel per worker. Idempotent.
  ///
  /// The sentinels queue behind all previously submitted tasks, so workers
  /// finish the backlog before they exit; a worker mid-task finishes that
  /// task first. Subsequent [`submit`](Self::submit) calls fail.
  pub fn initiate_shutdown(&mut self) {
    if self.shutdown_initiated {
      trace!(pool_name = %*self.pool_name, "Shutdown already initiated. No new stop signals sent.");
      return;
    }
    self.shutdown_initiated = true;

    info!(pool_name = %*self.pool_name, worker_count = self.worker_handles.len(), "Initiating pool shutdown: queuing one stop signal per worker.");
    for _ in 0..self.worker_handles.len() {
      if self.pool_end.send_stop().is_err() {
        warn!(pool_name = %*self.pool_name, "Pending queue disconnected while queuing stop signals; workers already gone.");
        break;
      }
    }
  }

  /// Initiates shutdown if needed, then blocks until every worker thread has
  /// exited and all published completion notifications have been dispatched.
  ///
  /// Workers drain the pending queue before they stop, so this waits for all
  /// submitted tasks to finish executing. Reports never collected are
  /// discarded with the manager.
  pub fn join(mut self) {
    self.initiate_shutdown();

    let handles = mem::take(&mut self.worker_handles);
    info!(pool_name = %*self.pool_name, worker_count = handles.len(), "Waiting for worker threads to join.");
    for handle in handles {
      if handle.join().is_err() {
        error!(pool_name = %*self.pool_name, "A worker thread panicked before joining.");
      }
    }

    self.notifier.shutdown();
    info!(pool_name = %*self.pool_name, "Pool shut down. All worker threads joined.");
  }

  /// Labels of every submitted task whose report has not been drained yet,
  /// whether in flight or still queued. Unlabeled tasks are reported as
  /// `#<task_id>`.
  fn all_outstanding_labels(&self) -> Vec<TaskLabel> {
    self
      .outstanding_tasks
      .iter()
      .map(|(task_id, label)| label.clone().unwrap_or_else(|| format!("#{}", task_id)))
      .collect()
  }

  /// Labels of tasks marked in flight on a worker thread that is no longer
  /// running. Unlabeled tasks are reported as `#<task_id>`.
  fn lost_task_labels(&self) -> Vec<TaskLabel> {
    self
      .in_flight
      .iter()
      .filter(|entry| {
        let worker_index = entry.value().0;
        self
          .worker_handles
          .get(worker_index)
          .map_or(true, |handle| handle.is_finished())
      })
      .map(|entry| {
        entry
          .value()
          .1
          .clone()
          .unwrap_or_else(|| format!("#{}", entry.key()))
      })
      .collect()
  }
}

impl<R: Send + 'static> Drop for ThreadPoolManager<R> {
  fn drop(&mut self) {
    if self.shutdown_initiated {
      trace!(pool_name = %*self.pool_name, "Drop: shutdown already initiated. No new signals sent.");
      return;
    }
    self.shutdown_initiated = true;

    // Signal the workers but never block the dropping thread; the threads
    // finish any queued work and exit on their own.
    info!(pool_name = %*self.pool_name, "ThreadPoolManager dropped without explicit join. Queuing stop signals without waiting for worker exit.");
    for _ in 0..self.worker_handles.len() {
      if self.pool_end.send_stop().is_err() {
        break;
      }
    }
  }
}

/// Runs a batch of independent tasks over a fixed-size worker pool and
/// returns one report per task.
///
/// Tasks are offered to the workers in input order; the returned reports are
/// in completion order, which with more than one worker generally differs
/// from input order. Every task executes exactly once; a panicking payload
/// yields a report with an [`Err`] outcome rather than crashing the run.
/// Workers are stopped and joined before this returns.
///
/// An empty `tasks` list returns immediately without starting any workers.
/// `worker_count` is clamped to at least 1.
pub fn run_pool<R: Send + 'static>(tasks: Vec<Task<R>>, worker_count: usize) -> Result<Vec<TaskReport<R>>, PoolError> {
  if tasks.is_empty() {
    debug!("run_pool: no tasks submitted, nothing to do.");
    return Ok(Vec::new());
  }

  let mut pool = ThreadPoolManager::new(worker_count, "run_pool");
  for task in tasks {
    pool.submit(task)?;
  }
  let reports = pool.collect()?;
  pool.join();
  Ok(reports)
}
