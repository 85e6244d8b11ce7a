//! A fixed-size pool of worker threads for fanning independent tasks out
//! over OS threads, collecting labeled reports in completion order, with
//! background task handles and completion notifications.

mod channel;
mod error;
mod handle;
mod notifier;
mod pool;
mod task;
mod worker;

pub use error::PoolError;
pub use handle::{submit_background, BackgroundHandle, TaskPoll};
pub use notifier::{TaskCompletionInfo, TaskCompletionStatus};
pub use pool::{run_pool, PoolBuilder, ThreadPoolManager};
pub use task::{Task, TaskFn, TaskLabel, TaskReport};
