use threadmill::{submit_background, BackgroundHandle, PoolError, Task, TaskPoll, TaskReport};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// Helper to initialize tracing for tests
fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,threadmill=trace"));

    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

// Helper that polls a handle until its report is ready, failing the test if
// the task is lost or the wait limit passes first.
fn poll_until_ready<R: Send + 'static>(handle: &mut BackgroundHandle<R>, max_wait: Duration) -> TaskReport<R> {
  let deadline = Instant::now() + max_wait;
  loop {
    match handle.try_take() {
      TaskPoll::Ready(report) => return report,
      TaskPoll::Pending => {
        assert!(Instant::now() < deadline, "Background task did not finish within {:?}.", max_wait);
        thread::sleep(Duration::from_millis(10));
      }
      TaskPoll::Failed(error) => panic!("Background task was lost while polling: {:?}", error),
    }
  }
}

// Panic payload that panics again when dropped. The worker catches the task's
// panic, then dies unwinding on the payload's drop, so its report never
// leaves the thread.
struct PanicOnDrop;

impl Drop for PanicOnDrop {
  fn drop(&mut self) {
    panic!("secondary panic from the payload's drop");
  }
}

#[test]
fn test_background_round_trip_with_polling() {
  setup_tracing_for_test();
  let test_name = "test_handle_round_trip";
  tracing::info!("Starting test: {}", test_name);

  let mut handle = submit_background(Task::labeled("slow-square", || {
    thread::sleep(Duration::from_millis(150));
    12 * 12
  }));

  // The payload sleeps 150ms, so the first poll cannot find a report yet.
  assert!(handle.try_take().is_pending(), "An immediate poll must report Pending.");

  let report = poll_until_ready(&mut handle, Duration::from_secs(5));
  assert_eq!(report.label.as_deref(), Some("slow-square"));
  assert_eq!(report.outcome, Ok(144));

  // The report was already taken; polling again is a deterministic error,
  // not a hang.
  match handle.try_take() {
    TaskPoll::Failed(PoolError::ResultUnavailable) => { /* Expected */ }
    other => panic!("Expected ResultUnavailable on the second take, got {:?}", other),
  }
  tracing::info!("Finished test: {}", test_name);
}

#[test]
fn test_take_blocking_returns_the_result() {
  setup_tracing_for_test();
  let test_name = "test_handle_take_blocking";
  tracing::info!("Starting test: {}", test_name);

  let handle = submit_background(Task::labeled("blocking-wait", || {
    thread::sleep(Duration::from_millis(60));
    "blocking_val".to_string()
  }));

  let report = handle.take_blocking().unwrap();
  assert_eq!(report.label.as_deref(), Some("blocking-wait"));
  assert_eq!(report.outcome, Ok("blocking_val".to_string()));
  tracing::info!("Finished test: {}", test_name);
}

#[test]
fn test_take_blocking_after_successful_poll_is_unavailable() {
  setup_tracing_for_test();
  let test_name = "test_handle_take_after_poll";
  tracing::info!("Starting test: {}", test_name);

  let mut handle = submit_background(Task::labeled("poll-first", || 41 + 1));
  let report = poll_until_ready(&mut handle, Duration::from_secs(5));
  assert_eq!(report.outcome, Ok(42));

  match handle.take_blocking() {
    Err(PoolError::ResultUnavailable) => { /* Expected */ }
    other => panic!("Expected ResultUnavailable after the report was taken, got {:?}", other),
  }
  tracing::info!("Finished test: {}", test_name);
}

#[test]
fn test_background_panic_is_reported_not_lost() {
  setup_tracing_for_test();
  let test_name = "test_handle_panic_report";
  tracing::info!("Starting test: {}", test_name);

  let handle = submit_background(Task::labeled("doomed-background", || -> String {
    panic!("synthetic failure in a background task")
  }));

  // The panic is contained on the worker and carried in the report; the
  // handle itself resolves normally.
  let report = handle.take_blocking().unwrap();
  assert_eq!(report.label.as_deref(), Some("doomed-background"));
  match &report.outcome {
    Err(PoolError::TaskPanicked(message)) => {
      assert!(
        message.contains("synthetic failure"),
        "Panic message should be preserved, got: {}",
        message
      );
    }
    other => panic!("Expected TaskPanicked outcome, got {:?}", other),
  }
  tracing::info!("Finished test: {}", test_name);
}

#[test]
fn test_polling_detects_a_lost_background_worker() {
  setup_tracing_for_test();
  let test_name = "test_handle_worker_lost";
  tracing::info!("Starting test: {}", test_name);

  let mut handle = submit_background(Task::labeled("lethal-background", || -> u32 {
    std::panic::panic_any(PanicOnDrop)
  }));

  // The worker dies without delivering, so polling must settle on Failed
  // instead of reporting Pending forever.
  let deadline = Instant::now() + Duration::from_secs(5);
  let error = loop {
    match handle.try_take() {
      TaskPoll::Failed(error) => break error,
      TaskPoll::Pending => {
        assert!(Instant::now() < deadline, "A dead worker was never detected.");
        thread::sleep(Duration::from_millis(10));
      }
      TaskPoll::Ready(report) => panic!("Expected the worker to die, got {:?}", report),
    }
  };
  match error {
    PoolError::WorkerLost(labels) => assert_eq!(labels, vec!["lethal-background".to_string()]),
    other => panic!("Expected WorkerLost, got {:?}", other),
  }
  tracing::info!("Finished test: {}", test_name);
}

#[test]
fn test_polling_against_an_external_deadline() {
  setup_tracing_for_test();
  let test_name = "test_handle_external_deadline";
  tracing::info!("Starting test: {}", test_name);

  let mut handle = submit_background(Task::labeled("deadline-bound", || {
    thread::sleep(Duration::from_millis(80));
    "finished in time".to_string()
  }));

  // The caller owns the deadline; the handle only answers "ready yet?".
  let deadline = Instant::now() + Duration::from_secs(5);
  let value = loop {
    if let TaskPoll::Ready(report) = handle.try_take() {
      break report.into_outcome().unwrap();
    }
    assert!(Instant::now() < deadline, "Task overran the polling deadline.");
    thread::sleep(Duration::from_millis(10));
  };
  assert_eq!(value, "finished in time");
  tracing::info!("Finished test: {}", test_name);
}

#[test]
fn test_dropping_an_unconsumed_handle_lets_the_task_finish() {
  setup_tracing_for_test();
  let test_name = "test_handle_drop_detaches";
  tracing::info!("Starting test: {}", test_name);

  let completed = Arc::new(AtomicBool::new(false));
  let completed_in_task = completed.clone();
  let handle = submit_background(Task::labeled("abandoned", move || {
    thread::sleep(Duration::from_millis(60));
    completed_in_task.store(true, Ordering::SeqCst);
    "never collected".to_string()
  }));
  drop(handle);

  // Drop only signals the worker to stop after its current item; the task
  // already in the queue still runs to completion.
  thread::sleep(Duration::from_millis(400));
  assert!(
    completed.load(Ordering::SeqCst),
    "The task must finish even though its handle was dropped."
  );
  tracing::info!("Finished test: {}", test_name);
}

#[test]
fn test_handle_reports_task_id_and_label() {
  setup_tracing_for_test();
  let test_name = "test_handle_identity";
  tracing::info!("Starting test: {}", test_name);

  let task = Task::labeled("identified", || 7u32);
  let task_id = task.id();
  let mut handle = submit_background(task);
  assert_eq!(handle.id(), task_id);
  assert_eq!(handle.label(), Some("identified"));

  let report = poll_until_ready(&mut handle, Duration::from_secs(5));
  assert_eq!(report.task_id, task_id);
  assert_eq!(report.into_outcome(), Ok(7));
  tracing::info!("Finished test: {}", test_name);
}
