use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use threadmill::{Task, TaskCompletionInfo, TaskCompletionStatus, ThreadPoolManager};
use tracing::info;

// Dummy task function
fn notified_task(id: usize, delay_ms: u64, should_panic: bool) -> String {
  info!(
    "NotifiedTask {}: Starting, will run for {}ms. Panic: {}",
    id, delay_ms, should_panic
  );
  thread::sleep(Duration::from_millis(delay_ms));
  if should_panic {
    info!("NotifiedTask {}: Panicking as requested!", id);
    panic!("NotifiedTask {} panicked!", id);
  }
  let result = format!("NotifiedTask {} finished successfully after {}ms", id, delay_ms);
  info!("{}", result);
  result
}

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();

  info!("--- Completion Notifier Example ---");

  let pool_name = "notifier_example_pool";
  let mut manager: ThreadPoolManager<String> = ThreadPoolManager::new(2, pool_name);

  // --- Setup Completion Handlers ---
  let successful_tasks_count = Arc::new(AtomicUsize::new(0));
  let failed_tasks_count = Arc::new(AtomicUsize::new(0)); // Panicked or errored

  // Handler 1: Simple logger
  manager.add_completion_handler({
    let pool_name_clone = manager.name().to_string();
    move |info: TaskCompletionInfo| {
      assert_eq!(*info.pool_name, pool_name_clone);
      info!(
        "[Handler 1 - Logger] Task {} (Pool: {}) completed. Status: {:?}, Label: {:?}, Time: {:?}",
        info.task_id, info.pool_name, info.status, info.label, info.completion_time
      );
    }
  });

  // Handler 2: Counter
  let s_clone = successful_tasks_count.clone();
  let f_clone = failed_tasks_count.clone();
  manager.add_completion_handler(move |info: TaskCompletionInfo| match info.status {
    TaskCompletionStatus::Success => {
      s_clone.fetch_add(1, Ordering::Relaxed);
      info!("[Handler 2 - Counter] Task {} succeeded.", info.task_id);
    }
    _ => {
      f_clone.fetch_add(1, Ordering::Relaxed);
      info!(
        "[Handler 2 - Counter] Task {} did not succeed (Status: {:?}).",
        info.task_id, info.status
      );
    }
  });

  // --- Submit Tasks ---
  manager
    .submit(Task::labeled("critical", || notified_task(1, 300, false)))
    .expect("submit failed");
  manager
    .submit(Task::new(|| notified_task(2, 100, true)))
    .expect("submit failed");
  manager
    .submit(Task::labeled("batch_job", || notified_task(3, 600, false)))
    .expect("submit failed");

  info!("All tasks submitted. Draining reports...");
  let reports = manager.collect().expect("collect failed");
  for report in &reports {
    match &report.outcome {
      Ok(result) => info!("Main: Result for task {}: {}", report.task_id, result),
      Err(e) => info!("Main: Error for task {}: {:?}", report.task_id, e),
    }
  }

  // --- Shutdown and Summary ---
  info!("All reports drained. Shutting down pool; join flushes the notifier.");
  manager.join();
  info!("Pool shutdown complete.");

  info!("--- Summary from Completion Notifier ---");
  info!(
    "Successful tasks (counted by handler): {}",
    successful_tasks_count.load(Ordering::Relaxed)
  );
  info!(
    "Non-successful tasks (counted by handler): {}",
    failed_tasks_count.load(Ordering::Relaxed)
  );
  info!("--- Completion Notifier Example End ---");
}
