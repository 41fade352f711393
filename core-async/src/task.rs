//! Task spawning.
//!
//! ```rust
//! use core_async::task;
//!
//! async fn example() {
//!     let handle = task::spawn(async { 21 * 2 });
//!     assert_eq!(handle.await.unwrap(), 42);
//! }
//! ```

pub use tokio::task::{spawn_blocking, yield_now, AbortHandle, JoinError, JoinHandle};

/// Spawns a new asynchronous task on the ambient Tokio runtime.
///
/// The returned `JoinHandle` can be awaited for the task's output or used to
/// abort it. Dropping the handle detaches the task.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::task::spawn(future)
}

/// Aborts `handle` and waits until the task has actually stopped.
///
/// Panics inside the task are swallowed; cancellation is the expected
/// outcome here.
pub async fn abort_and_wait<T>(handle: JoinHandle<T>) {
    handle.abort();
    let _ = handle.await;
}
