//! Async runtime facade for the storybook narration core.
//!
//! `core-*` and `provider-*` crates take their runtime primitives (tasks,
//! timers, channels, locks, cancellation) from here so the executor stays
//! swappable in one place. Only tokio's `select!`/`join!` macros are used
//! directly.
//!
//! # Modules
//!
//! - `task`: task spawning and join handles
//! - `time`: sleep, timeouts and cancellable delays
//! - `sync`: channels, locks and the cooperative `CancellationToken`
//! - `runtime`: blocking entry points for hosts without a runtime
//!
//! # Examples
//!
//! ```rust
//! use core_async::sync::CancellationToken;
//! use core_async::time::{sleep_or_cancel, Duration};
//!
//! async fn example() {
//!     let token = CancellationToken::new();
//!     let child = token.clone();
//!     core_async::spawn(async move {
//!         // Completes early once `token.cancel()` is called.
//!         let elapsed = sleep_or_cancel(Duration::from_millis(300), &child).await;
//!         assert!(!elapsed);
//!     });
//!     token.cancel();
//! }
//! ```

pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;

pub use task::spawn;
pub use time::{sleep, Duration, Instant};
