//! Serialised execution of external calls: priority ordering, per-task
//! deadlines, retry with backoff.

pub mod retry;
pub mod task_queue;

pub use retry::{with_retry, RetryPolicy};
pub use task_queue::{TaskHandle, TaskQueue};
