//! Per-pipeline counters and the queue occupancy gauge.

use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe metrics owned by one pipeline instance.
///
/// `processed_spans(dropped)` mirrors a counter tagged `{dropped: true|false}`:
/// `dropped=true` counts spans refused at admission, `dropped=false` counts
/// spans handed to the exporters.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    spans_exported: AtomicU64,
    spans_dropped: AtomicU64,
    batches_exported: AtomicU64,
    export_failures: AtomicU64,
    export_timeouts: AtomicU64,
    shutdown_failures: AtomicU64,
}

// All methods use `Ordering::Relaxed`: these are statistical counters that no
// control flow depends on, and they guard no other data.
impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spans processed, split by the `dropped` tag.
    pub fn processed_spans(&self, dropped: bool) -> u64 {
        if dropped {
            self.spans_dropped.load(Ordering::Relaxed)
        } else {
            self.spans_exported.load(Ordering::Relaxed)
        }
    }

    pub fn spans_dropped(&self) -> u64 {
        self.processed_spans(true)
    }

    pub fn spans_exported(&self) -> u64 {
        self.processed_spans(false)
    }

    pub fn batches_exported(&self) -> u64 {
        self.batches_exported.load(Ordering::Relaxed)
    }

    /// Failed exporter calls, timeouts included.
    pub fn export_failures(&self) -> u64 {
        self.export_failures.load(Ordering::Relaxed)
    }

    pub fn export_timeouts(&self) -> u64 {
        self.export_timeouts.load(Ordering::Relaxed)
    }

    pub fn shutdown_failures(&self) -> u64 {
        self.shutdown_failures.load(Ordering::Relaxed)
    }

    pub(crate) fn record_dropped(&self) {
        self.spans_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_batch(&self, span_count: usize) {
        self.spans_exported
            .fetch_add(span_count as u64, Ordering::Relaxed);
        self.batches_exported.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_export_failure(&self, timed_out: bool) {
        self.export_failures.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.export_timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_shutdown_failure(&self) {
        self.shutdown_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter plus the occupancy gauge.
    pub fn snapshot(&self, queue_occupancy: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_occupancy,
            spans_exported: self.spans_exported(),
            spans_dropped: self.spans_dropped(),
            batches_exported: self.batches_exported(),
            export_failures: self.export_failures(),
            export_timeouts: self.export_timeouts(),
            shutdown_failures: self.shutdown_failures(),
        }
    }
}

/// Plain copy of the pipeline metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Gauge: spans currently admitted to the queue.
    pub queue_occupancy: usize,
    pub spans_exported: u64,
    pub spans_dropped: u64,
    pub batches_exported: u64,
    pub export_failures: u64,
    pub export_timeouts: u64,
    pub shutdown_failures: u64,
}
