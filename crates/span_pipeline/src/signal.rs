//! Single-slot wake signal between producers and the controller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Coalescing wake-up for the batch controller.
///
/// Any number of `signal()` calls made while a wake is already pending
/// collapse into one. A signal raised before the controller starts waiting
/// is kept as a permit, so it is never lost.
#[derive(Debug, Default)]
pub struct WakeSignal {
    notify: Notify,
    pending: AtomicBool,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a wake-up. Never blocks.
    ///
    /// Returns `false` when the request was folded into an earlier one.
    pub fn signal(&self) -> bool {
        if self
            .pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.notify.notify_one();
            true
        } else {
            false
        }
    }

    /// Waits for a signal or for `timeout` to elapse.
    ///
    /// Returns `true` if woken by a signal.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let woken = tokio::time::timeout(timeout, self.notify.notified())
            .await
            .is_ok();
        // Re-arm after waking; signals raised from here on notify again.
        self.pending.store(false, Ordering::SeqCst);
        woken
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}
