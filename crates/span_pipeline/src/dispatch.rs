//! Fan-out of one batch to every configured exporter.

use crate::exporter::{ExportError, SpanExporterBoxed};
use crate::metrics::PipelineMetrics;
use crate::span::SpanBatch;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Result of one export cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ExportOutcome {
    /// Spans in the batch
    pub spans: usize,
    /// Exporter calls that failed
    pub failures: usize,
}

/// Hands `batch` to each exporter in order, then clears it.
///
/// Every call runs under its own `budget`. Failures, timeouts and panics are
/// logged, counted and skipped. Only cancellation aborts the cycle; the batch
/// is discarded in that case too.
pub(crate) async fn export_to_all(
    exporters: &[Box<dyn SpanExporterBoxed>],
    batch: &mut SpanBatch,
    budget: Duration,
    cancel: &CancellationToken,
    metrics: &PipelineMetrics,
) -> Result<ExportOutcome, ExportError> {
    if batch.is_empty() {
        return Ok(ExportOutcome::default());
    }

    let mut outcome = ExportOutcome {
        spans: batch.len(),
        failures: 0,
    };

    for exporter in exporters {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ExportError::Cancelled),
            result = export_one(exporter.as_ref(), batch, budget) => result,
        };

        match result {
            Ok(()) => {}
            Err(e) if e.is_cancellation() => {
                debug!(
                    exporter = exporter.name(),
                    spans = batch.len(),
                    "export cancelled, discarding batch"
                );
                batch.clear();
                return Err(e);
            }
            Err(e) => {
                warn!(exporter = exporter.name(), spans = batch.len(), error = %e, "export failed");
                metrics.record_export_failure(e.is_timeout());
                outcome.failures += 1;
            }
        }
    }

    metrics.record_batch(outcome.spans);
    batch.clear();
    Ok(outcome)
}

async fn export_one(
    exporter: &dyn SpanExporterBoxed,
    batch: &SpanBatch,
    budget: Duration,
) -> Result<(), ExportError> {
    let call = AssertUnwindSafe(exporter.export_boxed(batch)).catch_unwind();
    match tokio::time::timeout(budget, call).await {
        Ok(Ok(result)) => result,
        Ok(Err(_panic)) => Err(ExportError::Panicked {
            exporter: exporter.name().to_owned(),
        }),
        Err(_elapsed) => Err(ExportError::Timeout {
            exporter: exporter.name().to_owned(),
            after: budget,
        }),
    }
}

/// Calls `shutdown` on every exporter in order, whatever the earlier ones did.
///
/// Returns the number of exporters whose shutdown failed.
pub(crate) async fn shutdown_exporters(
    exporters: &[Box<dyn SpanExporterBoxed>],
    budget: Duration,
    metrics: &PipelineMetrics,
) -> usize {
    let mut failures = 0;
    for exporter in exporters {
        let call = AssertUnwindSafe(exporter.shutdown_boxed()).catch_unwind();
        let error = match tokio::time::timeout(budget, call).await {
            Ok(Ok(Ok(()))) => continue,
            Ok(Ok(Err(e))) => e,
            Ok(Err(_panic)) => ExportError::Panicked {
                exporter: exporter.name().to_owned(),
            },
            Err(_elapsed) => ExportError::Timeout {
                exporter: exporter.name().to_owned(),
                after: budget,
            },
        };
        warn!(exporter = exporter.name(), error = %error, "exporter shutdown failed");
        metrics.record_shutdown_failure();
        failures += 1;
    }
    failures
}
