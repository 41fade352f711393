//! Synchronization primitives.
//!
//! Async-aware locks and channels come from `tokio::sync`; the cooperative
//! cancellation token comes from `tokio_util`. All of them are `Send + Sync`.
//!
//! # Examples
//!
//! ```rust
//! use core_async::sync::{watch, CancellationToken};
//!
//! let (tx, rx) = watch::channel(0u32);
//! tx.send_replace(1);
//! assert_eq!(*rx.borrow(), 1);
//!
//! let token = CancellationToken::new();
//! token.cancel();
//! token.cancel(); // idempotent
//! assert!(token.is_cancelled());
//! ```

pub use tokio::sync::{
    broadcast, mpsc, oneshot, watch, Mutex, MutexGuard, Notify, RwLock, RwLockReadGuard,
    RwLockWriteGuard, Semaphore, SemaphorePermit,
};

pub use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFuture};
