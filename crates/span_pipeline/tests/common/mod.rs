#![allow(dead_code)]

use span_pipeline::exporter::{ExportError, SpanExporter};
use span_pipeline::{Span, SpanBatch, SpanKind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

/// Routes pipeline logs through the test harness (`RUST_LOG=span_pipeline=debug`).
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn span(id: u64) -> Span {
    Span::new(u128::from(id), id, format!("op-{id}"), SpanKind::Internal)
}

#[derive(Default)]
struct Recorded {
    batches: Mutex<Vec<Vec<u64>>>,
    shutdowns: AtomicUsize,
}

/// Records span ids per batch. Clones share the record.
#[derive(Clone, Default)]
pub struct RecordingExporter {
    recorded: Arc<Recorded>,
}

impl RecordingExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Vec<u64>> {
        self.recorded.batches.lock().unwrap().clone()
    }

    pub fn span_ids(&self) -> Vec<u64> {
        self.batches().into_iter().flatten().collect()
    }

    pub fn shutdown_count(&self) -> usize {
        self.recorded.shutdowns.load(Ordering::SeqCst)
    }

    fn record(&self, batch: &SpanBatch) {
        let ids = batch.iter().map(|s| s.span_id).collect();
        self.recorded.batches.lock().unwrap().push(ids);
    }
}

impl SpanExporter for RecordingExporter {
    async fn export(&self, batch: &SpanBatch) -> Result<(), ExportError> {
        self.record(batch);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ExportError> {
        self.recorded.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Fails every export and its shutdown.
#[derive(Clone, Default)]
pub struct FailingExporter {
    calls: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
}

impl FailingExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl SpanExporter for FailingExporter {
    async fn export(&self, _batch: &SpanBatch) -> Result<(), ExportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ExportError::Transport("collector unavailable".into()))
    }

    async fn shutdown(&self) -> Result<(), ExportError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Err(ExportError::Transport("collector unavailable".into()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Blocks its first export until released; later exports pass straight through.
#[derive(Clone, Default)]
pub struct GatedExporter {
    pub recorder: RecordingExporter,
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
    opened: Arc<AtomicBool>,
}

impl GatedExporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SpanExporter for GatedExporter {
    async fn export(&self, batch: &SpanBatch) -> Result<(), ExportError> {
        if !self.opened.swap(true, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.recorder.record(batch);
        Ok(())
    }

    fn name(&self) -> &str {
        "gated"
    }
}

/// Never finishes an export.
#[derive(Clone, Default)]
pub struct HangingExporter {
    pub entered: Arc<Notify>,
}

impl SpanExporter for HangingExporter {
    async fn export(&self, _batch: &SpanBatch) -> Result<(), ExportError> {
        self.entered.notify_one();
        std::future::pending::<()>().await;
        Ok(())
    }

    fn name(&self) -> &str {
        "hanging"
    }
}
