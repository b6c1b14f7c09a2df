//! Batching Pipeline Demo
//!
//! Several producer threads emit spans into one pipeline that exports through
//! a stdout exporter and a deliberately flaky one, then flushes, shuts down
//! and prints the pipeline metrics.
//!
//! Run with: `RUST_LOG=span_pipeline=debug cargo run --bin demo`

use anyhow::Context;
use rand::Rng;
use span_pipeline::exporter::{ExportError, SpanExporter};
use span_pipeline::{
    BatchSpanPipeline, PipelineConfig, Span, SpanBatch, SpanEvent, SpanKind, SpanStatus,
    StdoutExporter,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const PRODUCERS: u64 = 4;
const SPANS_PER_PRODUCER: u64 = 5_000;

/// Exporter that rejects a fraction of batches, like a collector under load.
struct FlakyExporter {
    failure_rate: f64,
    accepted: AtomicU64,
}

impl FlakyExporter {
    fn new(failure_rate: f64) -> Self {
        Self {
            failure_rate,
            accepted: AtomicU64::new(0),
        }
    }
}

impl SpanExporter for FlakyExporter {
    async fn export(&self, batch: &SpanBatch) -> Result<(), ExportError> {
        let (fail, latency_ms) = {
            let mut rng = rand::thread_rng();
            (rng.gen_bool(self.failure_rate), rng.gen_range(1..5))
        };
        tokio::time::sleep(Duration::from_millis(latency_ms)).await;

        if fail {
            return Err(ExportError::Transport("503 service unavailable".into()));
        }
        self.accepted.fetch_add(batch.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ExportError> {
        println!("flaky exporter accepted {} spans", self.accepted.load(Ordering::Relaxed));
        Ok(())
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

fn make_span(producer: u64, seq: u64) -> Span {
    let mut rng = rand::thread_rng();
    let status = if rng.gen_ratio(1, 50) {
        SpanStatus::Error {
            description: "upstream timeout".into(),
        }
    } else {
        SpanStatus::Ok
    };

    let trace_id = (u128::from(producer) << 64) | u128::from(seq);
    Span::new(trace_id, (producer << 32) | seq, "GET /orders", SpanKind::Server)
        .with_attribute("producer", producer as i64)
        .with_attribute("http.status_code", if status == SpanStatus::Ok { 200i64 } else { 504 })
        .with_event(SpanEvent::new("handler.start"))
        .finish(status)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("span_pipeline=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = PipelineConfig::from_env()
        .with_schedule_delay(Duration::from_millis(200))
        .with_max_queue_size(4096);

    let pipeline = Arc::new(
        BatchSpanPipeline::builder()
            .with_config(config)
            .with_exporter(StdoutExporter::new(false))
            .with_exporter(FlakyExporter::new(0.2))
            .build()
            .context("failed to start span pipeline")?,
    );
    info!(config = ?pipeline.config(), "pipeline running");

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let pipeline = Arc::clone(&pipeline);
            thread::spawn(move || {
                let mut accepted = 0u64;
                for seq in 0..SPANS_PER_PRODUCER {
                    if pipeline.on_span_completed(make_span(producer, seq)) {
                        accepted += 1;
                    }
                    if seq % 500 == 0 {
                        thread::sleep(Duration::from_millis(5));
                    }
                }
                accepted
            })
        })
        .collect();

    let mut accepted = 0;
    for producer in producers {
        accepted += producer
            .join()
            .map_err(|_| anyhow::anyhow!("producer thread panicked"))?;
    }
    println!("producers done: {accepted} spans accepted");

    let report = pipeline.force_flush().await?;
    println!(
        "flush: {} spans in {} batches, {} failed exporter calls",
        report.spans_exported, report.batches, report.failed_exports
    );

    pipeline.shutdown().await;

    let metrics = pipeline.metrics();
    println!("\n=== Pipeline Metrics ===");
    println!("processed (dropped=false): {}", metrics.spans_exported);
    println!("processed (dropped=true):  {}", metrics.spans_dropped);
    println!("batches exported:          {}", metrics.batches_exported);
    println!("export failures:           {}", metrics.export_failures);
    println!("export timeouts:           {}", metrics.export_timeouts);
    println!("queue occupancy:           {}", metrics.queue_occupancy);
    Ok(())
}
