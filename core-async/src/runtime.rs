//! Runtime utilities for hosts that do not already run an executor.

pub use tokio::runtime::{Builder, Handle, Runtime};

/// Runs the provided future to completion on a fresh current-thread runtime.
///
/// Returns the I/O error if the runtime cannot be constructed.
pub fn block_on<F>(future: F) -> std::io::Result<F::Output>
where
    F: std::future::Future,
{
    let runtime = Builder::new_current_thread().enable_all().build()?;
    Ok(runtime.block_on(future))
}

/// Returns `true` when called from inside a Tokio runtime context.
pub fn in_runtime() -> bool {
    Handle::try_current().is_ok()
}
