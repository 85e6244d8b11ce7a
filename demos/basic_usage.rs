use std::thread;
use std::time::Duration;

use threadmill::{run_pool, Task, ThreadPoolManager};
use tracing::info;

fn fit_partition(partition: usize, delay_ms: u64) -> String {
  info!("Partition {} starting, will run for {}ms", partition, delay_ms);
  thread::sleep(Duration::from_millis(delay_ms));
  let result = format!("Partition {} fitted successfully after {}ms", partition, delay_ms);
  info!("{}", result);
  result
}

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false) // Disable module paths for cleaner example output
    .init();

  info!("--- Basic Usage Example ---");

  // One-shot form: hand over a batch, get one report per task back in
  // completion order. Labels identify the inputs.
  let mut tasks = Vec::new();
  for i in 0..5usize {
    // Alternate run times for variety
    let delay_ms: u64 = 500 + (i as u64 % 3) * 250;
    tasks.push(Task::labeled(format!("partition-{}", i), move || fit_partition(i, delay_ms)));
  }

  info!("Submitting {} tasks to a 2-worker pool...", tasks.len());
  let reports = run_pool(tasks, 2).expect("pool run failed");

  for report in &reports {
    match &report.outcome {
      Ok(result) => info!("Result for task {:?} (id {}): {}", report.label, report.task_id, result),
      Err(e) => info!("Error for task {:?} (id {}): {:?}", report.label, report.task_id, e),
    }
  }

  // Long-lived form of the same pool: submit in rounds and collect between
  // them, reusing the worker threads.
  info!("Starting a long-lived pool for incremental rounds.");
  let mut manager: ThreadPoolManager<String> = ThreadPoolManager::<String>::builder()
    .worker_count(2)
    .pool_name("basic_pool")
    .build();

  for i in 5..8usize {
    let delay_ms: u64 = 200 + (i as u64 % 2) * 150;
    manager
      .submit(Task::labeled(format!("partition-{}", i), move || fit_partition(i, delay_ms)))
      .expect("submit failed");
  }
  info!(
    "Round submitted: {} queued, {} active, {} outstanding.",
    manager.queued_task_count(),
    manager.active_task_count(),
    manager.outstanding_count()
  );

  let round_reports = manager.collect().expect("collect failed");
  info!("Collected {} reports from the round.", round_reports.len());

  info!("Shutting down pool.");
  manager.join();
  info!("Pool shutdown complete.");
  info!("--- Basic Usage Example End ---");
}
