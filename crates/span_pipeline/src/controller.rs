//! The background worker that turns queued spans into export cycles.
//!
//! Exactly one [`BatchController`] exists per pipeline and it is the only
//! consumer of the span queue, so the batch buffer needs no synchronization.
//! Producers share state with it only through [`Shared`]: the queue's
//! occupancy counter, the wake signal, the flush token and the wake threshold.

use crate::dispatch::{self, ExportOutcome};
use crate::exporter::{ExportError, SpanExporterBoxed};
use crate::flush::{FlushCoordinator, FlushReport};
use crate::metrics::PipelineMetrics;
use crate::signal::WakeSignal;
use crate::span::{Span, SpanBatch};
use crate::SpanQueue;
use crossbeam_utils::Backoff;
use spanring::QueueConsumer;
use std::sync::atomic::{fence, AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Lifecycle of the batch controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControllerState {
    /// Accepting spans and exporting on size, time and flush triggers
    Running = 0,
    /// Stop requested; finishing the current iteration and the final drain
    Draining = 1,
    /// Exporters shut down or the controller was cancelled
    Stopped = 2,
}

impl ControllerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// Wake threshold published while the controller is not waiting.
const NOT_WAITING: usize = usize::MAX;

/// Park interval once spinning on an unpublished slot has run its course.
const PUBLISH_PARK: Duration = Duration::from_micros(100);

/// Spins on `backoff`; returns `true` when the caller should park instead.
fn spin_or_park(backoff: &Backoff) -> bool {
    if backoff.is_completed() {
        true
    } else {
        backoff.snooze();
        false
    }
}

/// State shared between producers, the facade and the controller.
pub(crate) struct Shared {
    pub(crate) queue: Arc<SpanQueue>,
    pub(crate) signal: WakeSignal,
    pub(crate) flush: FlushCoordinator,
    pub(crate) exporters: Vec<Box<dyn SpanExporterBoxed>>,
    pub(crate) metrics: PipelineMetrics,
    /// Occupancy at which a producer should wake the idle controller
    spans_needed: AtomicUsize,
    stop: AtomicBool,
    state: AtomicU8,
}

impl Shared {
    pub(crate) fn new(queue: Arc<SpanQueue>, exporters: Vec<Box<dyn SpanExporterBoxed>>) -> Self {
        Self {
            queue,
            signal: WakeSignal::new(),
            flush: FlushCoordinator::default(),
            exporters,
            metrics: PipelineMetrics::new(),
            spans_needed: AtomicUsize::new(NOT_WAITING),
            stop: AtomicBool::new(false),
            state: AtomicU8::new(ControllerState::Running as u8),
        }
    }

    /// Producer path: admit the span or count it as dropped. Never blocks.
    pub(crate) fn offer(&self, span: Span) -> bool {
        if self.is_stopping() {
            self.metrics.record_dropped();
            trace!("pipeline stopping, span dropped");
            return false;
        }

        match self.queue.try_enqueue(span) {
            Ok(occupancy) => {
                // Pairs with the fence in `BatchController::idle`.
                fence(Ordering::SeqCst);
                if occupancy >= self.spans_needed.load(Ordering::SeqCst) {
                    self.signal.signal();
                }
                true
            }
            Err(_span) => {
                // Full, or closed by a shutdown that started after the check above.
                self.metrics.record_dropped();
                trace!(capacity = self.queue.capacity(), "queue full or closed, span dropped");
                false
            }
        }
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.set_state(ControllerState::Draining);
        self.signal.signal();
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub(crate) fn state(&self) -> ControllerState {
        ControllerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ControllerState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Single consumer of the span queue.
pub(crate) struct BatchController {
    consumer: QueueConsumer<Span>,
    shared: Arc<Shared>,
    batch: SpanBatch,
    max_batch_size: usize,
    schedule_delay: Duration,
    export_timeout: Duration,
    cancel: CancellationToken,
}

impl BatchController {
    pub(crate) fn new(
        consumer: QueueConsumer<Span>,
        shared: Arc<Shared>,
        max_batch_size: usize,
        schedule_delay: Duration,
        export_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            consumer,
            shared,
            batch: SpanBatch::with_capacity(max_batch_size),
            max_batch_size,
            schedule_delay,
            export_timeout,
            cancel,
        }
    }

    /// Runs until a stop is requested (`Ok`) or the token is cancelled.
    ///
    /// Spans still queued when this returns `Ok` are left for
    /// [`drain_remaining`](Self::drain_remaining).
    pub(crate) async fn run(&mut self) -> Result<(), ExportError> {
        debug!(
            max_batch_size = self.max_batch_size,
            schedule_delay = ?self.schedule_delay,
            "batch controller started"
        );
        let mut deadline = Instant::now() + self.schedule_delay;
        let stall = Backoff::new();

        while !self.shared.is_stopping() {
            if self.cancel.is_cancelled() {
                self.batch.clear();
                return Err(ExportError::Cancelled);
            }

            if let Some(ticket) = self.shared.flush.take() {
                // On cancellation the ticket is dropped and its waiters fail.
                let report = self.flush_observed().await?;
                trace!(?report, "flush completed");
                ticket.complete(report);
                deadline = Instant::now() + self.schedule_delay;
                continue;
            }

            let room = self.max_batch_size - self.batch.len();
            let taken = self.fill(room);

            if self.batch.len() >= self.max_batch_size || Instant::now() >= deadline {
                self.export().await?;
                deadline = Instant::now() + self.schedule_delay;
            }

            if self.consumer.is_empty() {
                let wait = deadline.saturating_duration_since(Instant::now());
                if !wait.is_zero() {
                    self.idle(wait).await?;
                }
            } else if taken == 0 {
                // Admitted but not yet published by its producer.
                let park = spin_or_park(&stall);
                if park {
                    tokio::time::sleep(PUBLISH_PARK).await;
                }
            } else {
                stall.reset();
            }
        }

        debug!(queued = self.consumer.len(), "batch controller stopping");
        Ok(())
    }

    /// Moves up to `max` queued spans into the batch.
    fn fill(&mut self, max: usize) -> usize {
        let batch = &mut self.batch;
        self.consumer.drain_up_to(max, |span| batch.push(span))
    }

    async fn export(&mut self) -> Result<ExportOutcome, ExportError> {
        dispatch::export_to_all(
            &self.shared.exporters,
            &mut self.batch,
            self.export_timeout,
            &self.cancel,
            &self.shared.metrics,
        )
        .await
    }

    /// Drains every position claimed when the flush was picked up, in
    /// batch-sized export cycles. Spans claimed later stay queued.
    ///
    /// A claimed slot whose producer has not written it yet is waited for,
    /// never skipped.
    async fn flush_observed(&mut self) -> Result<FlushReport, ExportError> {
        let mut remaining = self.consumer.backlog();
        let mut report = FlushReport::default();
        let stall = Backoff::new();

        loop {
            let want = (self.max_batch_size - self.batch.len()).min(remaining);
            let taken = self.fill(want);
            remaining -= taken;

            if self.batch.len() >= self.max_batch_size || remaining == 0 {
                report.record(self.export().await?);
            }
            if remaining == 0 {
                return Ok(report);
            }

            if taken > 0 {
                stall.reset();
            } else if self.cancel.is_cancelled() {
                self.batch.clear();
                return Err(ExportError::Cancelled);
            } else {
                let park = spin_or_park(&stall);
                if park {
                    tokio::time::sleep(PUBLISH_PARK).await;
                }
            }
        }
    }

    /// Sleeps until woken by a producer, a flush, a stop request or `wait`.
    async fn idle(&mut self, wait: Duration) -> Result<(), ExportError> {
        let needed = self.max_batch_size - self.batch.len();
        self.shared.spans_needed.store(needed, Ordering::SeqCst);
        fence(Ordering::SeqCst);

        // A producer may have crossed the threshold before it was published.
        let result = if self.consumer.len() >= needed {
            Ok(())
        } else {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => Err(ExportError::Cancelled),
                _ = self.shared.signal.wait(wait) => Ok(()),
            }
        };

        self.shared.spans_needed.store(NOT_WAITING, Ordering::SeqCst);
        if result.is_err() {
            self.batch.clear();
        }
        result
    }

    /// Exports everything still queued as one final batch.
    ///
    /// The queue must already be closed: the drain waits until every admitted
    /// span has been published and read, or until `give_up`. Runs under
    /// `cancel`, which is separate from the loop's token so a cancelled loop
    /// still gets its residual spans attempted once.
    pub(crate) async fn drain_remaining(
        &mut self,
        cancel: &CancellationToken,
        give_up: Instant,
    ) -> FlushReport {
        let stall = Backoff::new();
        let mut drained = 0;

        loop {
            let batch = &mut self.batch;
            let taken = self.consumer.drain(|span| batch.push(span));
            drained += taken;

            if self.consumer.is_empty() {
                break;
            }
            if Instant::now() >= give_up {
                warn!(
                    unpublished = self.consumer.len(),
                    "producers did not publish admitted spans in time, abandoning them"
                );
                break;
            }
            if taken > 0 {
                stall.reset();
            } else {
                let park = spin_or_park(&stall);
                if park {
                    tokio::time::sleep(PUBLISH_PARK).await;
                }
            }
        }
        debug!(spans = drained, batch = self.batch.len(), "final drain");

        let mut report = FlushReport::default();
        match dispatch::export_to_all(
            &self.shared.exporters,
            &mut self.batch,
            self.export_timeout,
            cancel,
            &self.shared.metrics,
        )
        .await
        {
            Ok(outcome) => report.record(outcome),
            Err(e) => debug!(error = %e, "final export cancelled"),
        }
        report
    }
}
