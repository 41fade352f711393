//! Time-related abstractions.
//!
//! Re-exports `tokio::time` plus a cancellable sleep used by the settle
//! delays between page turns and narration restarts.

pub use tokio::time::{interval, sleep, sleep_until, timeout, Interval, Sleep, Timeout};

pub use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::sync::CancellationToken;

/// Sleeps for `duration` unless `token` is cancelled first.
///
/// Returns `true` when the full duration elapsed and `false` when the sleep
/// was cut short by cancellation. A token that is already cancelled returns
/// `false` immediately.
pub async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> bool {
    if token.is_cancelled() {
        return false;
    }

    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = sleep(duration) => true,
    }
}
