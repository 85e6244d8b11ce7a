use std::thread;
use std::time::Duration;

use threadmill::{submit_background, Task, TaskPoll};
use tracing::info;

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false) // Disable module paths for cleaner example output
    .init();

  info!("--- Background Task Example ---");

  // A long computation moved off the current thread.
  let mut handle = submit_background(Task::labeled("expensive-model-fit", || {
    info!("Background: fitting the model, this takes a while...");
    thread::sleep(Duration::from_millis(1200));
    info!("Background: fit converged.");
    98.6_f64
  }));
  info!("Submitted background task {} ({:?}).", handle.id(), handle.label());

  // The foreground keeps doing its own work, peeking at the handle between
  // steps without ever blocking on it.
  let mut early_report = None;
  for step in 1..=3 {
    info!("Foreground: working on step {}...", step);
    thread::sleep(Duration::from_millis(250));

    match handle.try_take() {
      TaskPoll::Pending => info!("Foreground: background task not done yet."),
      TaskPoll::Ready(report) => {
        info!("Foreground: background task finished early.");
        early_report = Some(report);
        break;
      }
      TaskPoll::Failed(error) => {
        info!("Foreground: background task failed: {:?}", error);
        break;
      }
    }
  }

  // Foreground work is done; wait for the result if it has not arrived yet.
  let outcome = match early_report {
    Some(report) => report.into_outcome(),
    None => {
      info!("Foreground work finished first. Blocking on the background task.");
      match handle.take_blocking() {
        Ok(report) => report.into_outcome(),
        Err(e) => Err(e),
      }
    }
  };

  match outcome {
    Ok(score) => info!("Model score: {}", score),
    Err(e) => info!("Model fit failed: {:?}", e),
  }
  info!("--- Background Task Example End ---");
}
