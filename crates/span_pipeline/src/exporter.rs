use crate::span::SpanBatch;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Error types for span export operations
#[derive(Debug, Error)]
pub enum ExportError {
    /// Transport-layer error (network, gRPC, HTTP)
    #[error("transport error: {0}")]
    Transport(String),
    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Local I/O error
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// The exporter has been shut down
    #[error("exporter is shut down")]
    Closed,
    /// The call exceeded its per-export budget
    #[error("exporter `{exporter}` timed out after {after:?}")]
    Timeout { exporter: String, after: Duration },
    /// The exporter panicked while exporting
    #[error("exporter `{exporter}` panicked")]
    Panicked { exporter: String },
    /// Cooperative teardown; never swallowed by the pipeline
    #[error("export cancelled")]
    Cancelled,
}

impl ExportError {
    /// Returns `true` for the teardown signal, as opposed to an ordinary failure.
    #[inline]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Boxed future returned by [`SpanExporterBoxed`].
pub type ExportFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + 'a>>;

/// Trait for exporting span batches to various backends.
///
/// Uses native async fn in traits instead of `#[async_trait]`. The batch is
/// borrowed for the duration of one call; implementations that need the spans
/// afterwards must copy what they keep.
///
/// # Note on Object Safety
///
/// This trait uses `impl Future` return types which are not object-safe.
/// For dynamic dispatch, use `Box<dyn SpanExporterBoxed>`; every
/// `SpanExporter` gets it through a blanket impl.
pub trait SpanExporter: Send + Sync {
    /// Exports a batch of spans.
    fn export(&self, batch: &SpanBatch) -> impl Future<Output = Result<(), ExportError>> + Send;

    /// Releases exporter resources. Called once, after the final export.
    fn shutdown(&self) -> impl Future<Output = Result<(), ExportError>> + Send {
        async { Ok(()) }
    }

    /// Returns the exporter name for debugging.
    fn name(&self) -> &str;
}

/// Object-safe version of SpanExporter for dynamic dispatch.
pub trait SpanExporterBoxed: Send + Sync {
    /// Exports a batch of spans (boxed future for object safety).
    fn export_boxed<'a>(&'a self, batch: &'a SpanBatch) -> ExportFuture<'a>;

    fn shutdown_boxed(&self) -> ExportFuture<'_>;

    /// Returns the exporter name for debugging.
    fn name(&self) -> &str;
}

/// Blanket implementation: any SpanExporter can be used as SpanExporterBoxed
impl<T: SpanExporter> SpanExporterBoxed for T {
    fn export_boxed<'a>(&'a self, batch: &'a SpanBatch) -> ExportFuture<'a> {
        Box::pin(self.export(batch))
    }

    fn shutdown_boxed(&self) -> ExportFuture<'_> {
        Box::pin(self.shutdown())
    }

    fn name(&self) -> &str {
        SpanExporter::name(self)
    }
}

/// Stdout exporter for testing and debugging
pub struct StdoutExporter {
    verbose: bool,
}

impl StdoutExporter {
    /// Creates a new stdout exporter
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl SpanExporter for StdoutExporter {
    async fn export(&self, batch: &SpanBatch) -> Result<(), ExportError> {
        if self.verbose {
            println!("=== Exporting {} spans ===", batch.len());
            for span in batch {
                println!(
                    "Span: trace_id={:032x} span_id={:016x} name={} duration={}ns status={:?}",
                    span.trace_id,
                    span.span_id,
                    span.name,
                    span.duration_nanos(),
                    span.status
                );
            }
            println!("=== Export complete ===\n");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "stdout"
    }
}

/// JSON-lines file exporter for local development.
///
/// Appends one JSON object per span. The file is opened lazily on the first
/// export and closed by `shutdown`; exports after that fail with
/// [`ExportError::Closed`].
pub struct JsonFileExporter {
    file_path: PathBuf,
    state: Mutex<FileState>,
}

#[derive(Default)]
struct FileState {
    file: Option<File>,
    closed: bool,
}

impl JsonFileExporter {
    /// Creates a new JSON file exporter
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            state: Mutex::new(FileState::default()),
        }
    }
}

impl SpanExporter for JsonFileExporter {
    async fn export(&self, batch: &SpanBatch) -> Result<(), ExportError> {
        let mut buf = Vec::with_capacity(batch.len() * 256);
        for span in batch {
            serde_json::to_writer(&mut buf, span)
                .map_err(|e| ExportError::Serialization(e.to_string()))?;
            buf.push(b'\n');
        }

        let mut state = self.state.lock().await;
        if state.closed {
            return Err(ExportError::Closed);
        }
        if state.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.file_path)
                .await?;
            state.file = Some(file);
        }

        if let Some(file) = state.file.as_mut() {
            file.write_all(&buf).await?;
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ExportError> {
        let mut state = self.state.lock().await;
        state.closed = true;
        if let Some(mut file) = state.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "json_file"
    }
}

/// Null exporter that discards all spans (for benchmarking)
#[derive(Debug, Default)]
pub struct NullExporter;

impl NullExporter {
    pub fn new() -> Self {
        Self
    }
}

impl SpanExporter for NullExporter {
    async fn export(&self, _batch: &SpanBatch) -> Result<(), ExportError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Test exporter that records all exported batches for verification
#[cfg(test)]
#[derive(Default)]
pub(crate) struct TestExporter {
    batches: std::sync::Mutex<Vec<Vec<crate::span::Span>>>,
    shutdowns: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl TestExporter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn exported_count(&self) -> usize {
        self.batches.lock().unwrap().iter().map(Vec::len).sum()
    }

    pub(crate) fn batch_span_ids(&self) -> Vec<Vec<u64>> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .map(|b| b.iter().map(|s| s.span_id).collect())
            .collect()
    }

    pub(crate) fn shutdown_count(&self) -> usize {
        self.shutdowns.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl SpanExporter for TestExporter {
    async fn export(&self, batch: &SpanBatch) -> Result<(), ExportError> {
        self.batches.lock().unwrap().push(batch.spans().to_vec());
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ExportError> {
        self.shutdowns.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "test"
    }
}

/// Exporter whose every call fails (or panics, or hangs) for isolation tests
#[cfg(test)]
pub(crate) enum FaultyExporter {
    Fails,
    Panics,
    Hangs,
    Cancels,
}

#[cfg(test)]
impl SpanExporter for FaultyExporter {
    async fn export(&self, _batch: &SpanBatch) -> Result<(), ExportError> {
        match self {
            Self::Fails => Err(ExportError::Transport("connection refused".into())),
            Self::Panics => panic!("exporter bug"),
            Self::Hangs => {
                std::future::pending::<()>().await;
                Ok(())
            }
            Self::Cancels => Err(ExportError::Cancelled),
        }
    }

    async fn shutdown(&self) -> Result<(), ExportError> {
        Err(ExportError::Transport("already disconnected".into()))
    }

    fn name(&self) -> &str {
        "faulty"
    }
}
