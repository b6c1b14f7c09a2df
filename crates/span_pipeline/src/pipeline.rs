use crate::config::PipelineConfig;
use crate::controller::{BatchController, ControllerState, Shared};
use crate::dispatch;
use crate::error::PipelineError;
use crate::exporter::{ExportError, SpanExporter, SpanExporterBoxed};
use crate::flush::FlushReport;
use crate::metrics::MetricsSnapshot;
use crate::span::Span;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type ControllerTask = JoinHandle<(BatchController, Result<(), ExportError>)>;

/// Builder for [`BatchSpanPipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    config: PipelineConfig,
    exporters: Vec<Box<dyn SpanExporterBoxed>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Appends an exporter. Exporters are called in the order they are added.
    pub fn with_exporter<E: SpanExporter + 'static>(mut self, exporter: E) -> Self {
        self.exporters.push(Box::new(exporter));
        self
    }

    pub fn with_boxed_exporter(mut self, exporter: Box<dyn SpanExporterBoxed>) -> Self {
        self.exporters.push(exporter);
        self
    }

    /// Validates the configuration and spawns the controller on the current
    /// tokio runtime.
    pub fn build(self) -> Result<BatchSpanPipeline, PipelineError> {
        let config = self.config.validate()?;
        if self.exporters.is_empty() {
            return Err(PipelineError::NoExporters);
        }
        let runtime = Handle::try_current().map_err(|_| PipelineError::NoRuntime)?;
        let (queue, consumer) = spanring::bounded(config.max_queue_size)?;

        let shared = Arc::new(Shared::new(queue, self.exporters));
        let cancel = CancellationToken::new();
        let mut controller = BatchController::new(
            consumer,
            Arc::clone(&shared),
            config.max_export_batch_size,
            config.schedule_delay,
            config.export_timeout,
            cancel.clone(),
        );

        let task_shared = Arc::clone(&shared);
        let task = runtime.spawn(async move {
            let result = controller.run().await;
            if result.is_err() && !task_shared.is_stopping() {
                info!("batch controller cancelled");
                task_shared.set_state(ControllerState::Stopped);
            }
            (controller, result)
        });

        debug!(
            max_queue_size = config.max_queue_size,
            max_export_batch_size = config.max_export_batch_size,
            exporters = shared.exporters.len(),
            "span pipeline started"
        );

        Ok(BatchSpanPipeline {
            shared,
            config,
            cancel,
            task: Mutex::new(Some(task)),
            shutdown_started: AtomicBool::new(false),
        })
    }
}

/// Batching span pipeline.
///
/// Producers hand completed spans to [`on_span_completed`](Self::on_span_completed)
/// from any thread without ever blocking; a single background task groups them
/// into batches and exports them through every configured exporter when the
/// batch is full, when the schedule delay expires, on [`force_flush`](Self::force_flush)
/// and on [`shutdown`](Self::shutdown).
///
/// Dropping the pipeline without calling `shutdown` cancels the background
/// task; queued spans are then discarded.
pub struct BatchSpanPipeline {
    shared: Arc<Shared>,
    config: PipelineConfig,
    cancel: CancellationToken,
    task: Mutex<Option<ControllerTask>>,
    shutdown_started: AtomicBool,
}

impl BatchSpanPipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Enqueues a finished span.
    ///
    /// Returns `false` when the span was dropped because the queue is full or
    /// the pipeline is shutting down. Drops are counted, never reported as
    /// errors.
    pub fn on_span_completed(&self, span: Span) -> bool {
        self.shared.offer(span)
    }

    /// Exports everything queued at the time of the call.
    ///
    /// The request is registered before this returns; spans enqueued after
    /// that are not waited for. Concurrent callers share one drain. Export
    /// failures do not make this fail; inspect [`FlushReport::is_clean`].
    pub fn force_flush(
        &self,
    ) -> impl Future<Output = Result<FlushReport, PipelineError>> + Send + 'static {
        let waiter = if self.shared.is_stopping() {
            None
        } else {
            self.shared.flush.attach().map(|(waiter, created)| {
                if created {
                    self.shared.signal.signal();
                }
                waiter
            })
        };

        async move {
            match waiter {
                Some(waiter) => waiter.await.map_err(|_| PipelineError::ShutDown),
                None => Err(PipelineError::ShutDown),
            }
        }
    }

    /// Stops the controller, exports residual spans once and shuts down every
    /// exporter.
    ///
    /// Only the first call does the work; later calls return immediately.
    pub async fn shutdown(&self) {
        if self.shutdown_started.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(queued = self.shared.queue.len(), "shutting down span pipeline");
        self.shared.request_stop();

        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        let mut controller = match task {
            Some(task) => self.join_controller(task).await,
            None => None,
        };

        // No admission past this point: the occupancy can only fall.
        self.shared.queue.close();
        let give_up = Instant::now() + self.config.shutdown_timeout;
        let report = match controller.as_mut() {
            Some(controller) => {
                controller
                    .drain_remaining(&CancellationToken::new(), give_up)
                    .await
            }
            None => FlushReport::default(),
        };
        if let Some(ticket) = self.shared.flush.close() {
            ticket.complete(report);
        }

        let failures = dispatch::shutdown_exporters(
            &self.shared.exporters,
            self.config.export_timeout,
            &self.shared.metrics,
        )
        .await;
        self.shared.set_state(ControllerState::Stopped);

        let metrics = self.metrics();
        info!(
            spans_exported = metrics.spans_exported,
            spans_dropped = metrics.spans_dropped,
            export_failures = metrics.export_failures,
            exporter_shutdown_failures = failures,
            "span pipeline stopped"
        );
    }

    /// Waits for the current iteration, cancelling it past the shutdown timeout.
    async fn join_controller(&self, mut task: ControllerTask) -> Option<BatchController> {
        let joined = match tokio::time::timeout(self.config.shutdown_timeout, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    timeout = ?self.config.shutdown_timeout,
                    "batch controller did not stop in time, cancelling"
                );
                self.cancel.cancel();
                task.await
            }
        };

        match joined {
            Ok((controller, result)) => {
                if let Err(e) = result {
                    debug!(error = %e, "batch controller loop ended early");
                }
                Some(controller)
            }
            Err(e) => {
                error!(error = %e, "batch controller task failed");
                None
            }
        }
    }

    pub fn state(&self) -> ControllerState {
        self.shared.state()
    }

    /// Gauge: spans currently admitted to the queue.
    pub fn queue_occupancy(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot(self.queue_occupancy())
    }

    /// The validated configuration in effect.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

impl Drop for BatchSpanPipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
