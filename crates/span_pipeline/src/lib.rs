//! Batching Span Export Pipeline
//!
//! Sits between tracing instrumentation and span exporters. Instrumented code
//! hands each finished span to [`BatchSpanPipeline::on_span_completed`], which
//! never blocks: the span goes into a bounded lock-free queue, or is dropped and
//! counted when the queue is full. One background tokio task drains the queue
//! into batches and exports them when a batch fills up, when the schedule delay
//! runs out, on [`force_flush`](BatchSpanPipeline::force_flush) and on
//! [`shutdown`](BatchSpanPipeline::shutdown).
//!
//! Exporters use native async fn in traits (no `#[async_trait]`); a blanket impl
//! provides the object-safe [`SpanExporterBoxed`] the pipeline stores.
//!
//! # Example
//!
//! ```no_run
//! use span_pipeline::{
//!     BatchSpanPipeline, PipelineConfig, Span, SpanKind, SpanStatus, StdoutExporter,
//! };
//!
//! # async fn run() -> Result<(), span_pipeline::PipelineError> {
//! let pipeline = BatchSpanPipeline::builder()
//!     .with_config(PipelineConfig::from_env())
//!     .with_exporter(StdoutExporter::new(true))
//!     .build()?;
//!
//! let span = Span::new(1, 1, "GET /users", SpanKind::Server).finish(SpanStatus::Ok);
//! pipeline.on_span_completed(span);
//!
//! let report = pipeline.force_flush().await?;
//! assert!(report.is_clean());
//! pipeline.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
mod controller;
mod dispatch;
pub mod error;
pub mod exporter;
pub mod flush;
pub mod metrics;
mod pipeline;
pub mod signal;
pub mod span;

/// The hand-off queue between producers and the batch controller.
pub type SpanQueue = spanring::BoundedQueue<span::Span>;

// Re-export main types
pub use config::{ConfigError, PipelineConfig};
pub use controller::ControllerState;
pub use error::PipelineError;
pub use exporter::{
    ExportError, JsonFileExporter, NullExporter, SpanExporter, SpanExporterBoxed, StdoutExporter,
};
pub use flush::FlushReport;
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use pipeline::{BatchSpanPipeline, PipelineBuilder};
pub use signal::WakeSignal;
pub use span::{AttributeValue, Span, SpanBatch, SpanEvent, SpanKind, SpanStatus};
