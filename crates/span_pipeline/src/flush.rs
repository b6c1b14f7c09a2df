//! The single in-flight flush token.
//!
//! Concurrent `force_flush` callers attach to the same pending request; the
//! controller takes it, drains what was queued at that moment and completes it.
//! A request the controller never completes (cancellation, shutdown) resolves
//! its waiters with [`PipelineError::ShutDown`](crate::PipelineError::ShutDown).

use crate::dispatch::ExportOutcome;
use futures_util::future::{FutureExt, Shared};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// What a completed flush exported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Spans handed to the exporters
    pub spans_exported: usize,
    /// Export cycles the drain was split into
    pub batches: usize,
    /// Individual exporter calls that failed or timed out
    pub failed_exports: usize,
}

impl FlushReport {
    /// `true` when every exporter accepted every batch.
    pub fn is_clean(&self) -> bool {
        self.failed_exports == 0
    }

    pub(crate) fn record(&mut self, outcome: ExportOutcome) {
        if outcome.spans == 0 {
            return;
        }
        self.spans_exported += outcome.spans;
        self.batches += 1;
        self.failed_exports += outcome.failures;
    }
}

pub(crate) type FlushWaiter = Shared<oneshot::Receiver<FlushReport>>;

struct PendingFlush {
    tx: oneshot::Sender<FlushReport>,
    rx: FlushWaiter,
}

#[derive(Default)]
struct TokenSlot {
    pending: Option<PendingFlush>,
    closed: bool,
}

/// Holder of the pending flush request.
#[derive(Default)]
pub(crate) struct FlushCoordinator {
    slot: Mutex<TokenSlot>,
    requested: AtomicBool,
}

/// Claimed by the controller; dropping it without [`complete`](Self::complete)
/// fails every waiter.
pub(crate) struct FlushTicket {
    tx: oneshot::Sender<FlushReport>,
}

impl FlushTicket {
    pub(crate) fn complete(self, report: FlushReport) {
        // Every waiter may have given up already.
        let _ = self.tx.send(report);
    }
}

impl FlushCoordinator {
    fn lock(&self) -> MutexGuard<'_, TokenSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Joins the pending request, creating it if there is none.
    ///
    /// Returns the waiter and whether a new request was created (the caller
    /// must then wake the controller), or `None` once closed.
    pub(crate) fn attach(&self) -> Option<(FlushWaiter, bool)> {
        let mut slot = self.lock();
        if slot.closed {
            return None;
        }
        if let Some(pending) = &slot.pending {
            return Some((pending.rx.clone(), false));
        }

        let (tx, rx) = oneshot::channel();
        let rx = rx.shared();
        slot.pending = Some(PendingFlush { tx, rx: rx.clone() });
        self.requested.store(true, Ordering::SeqCst);
        Some((rx, true))
    }

    /// Cheap check used by the controller before taking the lock.
    pub(crate) fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Claims the pending request. Callers attaching afterwards start a new one.
    pub(crate) fn take(&self) -> Option<FlushTicket> {
        if !self.is_requested() {
            return None;
        }
        let mut slot = self.lock();
        self.requested.store(false, Ordering::SeqCst);
        slot.pending.take().map(|pending| FlushTicket { tx: pending.tx })
    }

    /// Refuses further requests and hands back the one still pending, if any.
    pub(crate) fn close(&self) -> Option<FlushTicket> {
        let mut slot = self.lock();
        slot.closed = true;
        self.requested.store(false, Ordering::SeqCst);
        slot.pending.take().map(|pending| FlushTicket { tx: pending.tx })
    }
}
