mod common;

use common::{
    init_test_logging, span, FailingExporter, GatedExporter, HangingExporter, RecordingExporter,
};
use span_pipeline::{
    BatchSpanPipeline, ControllerState, PipelineConfig, PipelineError, Span, SpanKind,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn config(queue: usize, batch: usize, delay: Duration) -> PipelineConfig {
    PipelineConfig::default()
        .with_max_queue_size(queue)
        .with_max_export_batch_size(batch)
        .with_schedule_delay(delay)
}

#[tokio::test(start_paused = true)]
async fn test_flush_scenario_then_independent_cycle() {
    init_test_logging();
    let recorder = RecordingExporter::new();
    let pipeline = BatchSpanPipeline::builder()
        .with_config(config(4, 2, Duration::from_millis(100)))
        .with_exporter(recorder.clone())
        .build()
        .unwrap();

    for id in [1, 2, 3] {
        assert!(pipeline.on_span_completed(span(id)));
    }
    let report = pipeline.force_flush().await.unwrap();

    assert_eq!(recorder.batches(), vec![vec![1, 2], vec![3]]);
    assert_eq!(report.spans_exported, 3);
    assert_eq!(report.batches, 2);
    assert!(report.is_clean());

    assert!(pipeline.on_span_completed(span(4)));
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(recorder.batches(), vec![vec![1, 2], vec![3], vec![4]]);

    pipeline.shutdown().await;
    assert_eq!(recorder.span_ids(), vec![1, 2, 3, 4]);
}

#[tokio::test(start_paused = true)]
async fn test_flush_excludes_spans_enqueued_later() {
    init_test_logging();
    let gated = GatedExporter::new();
    let pipeline = BatchSpanPipeline::builder()
        .with_config(config(16, 8, Duration::from_secs(60)))
        .with_exporter(gated.clone())
        .build()
        .unwrap();

    pipeline.on_span_completed(span(1));
    pipeline.on_span_completed(span(2));
    let flush = tokio::spawn(pipeline.force_flush());

    // The drain of [1, 2] is now inside the exporter.
    gated.entered.notified().await;
    pipeline.on_span_completed(span(3));
    gated.release.notify_one();

    let report = flush.await.unwrap().unwrap();
    assert_eq!(report.spans_exported, 2);
    assert_eq!(gated.recorder.batches(), vec![vec![1, 2]]);

    pipeline.shutdown().await;
    assert_eq!(gated.recorder.batches(), vec![vec![1, 2], vec![3]]);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_flushes_share_one_drain() {
    let recorder = RecordingExporter::new();
    let pipeline = BatchSpanPipeline::builder()
        .with_config(config(8, 2, Duration::from_secs(60)))
        .with_exporter(recorder.clone())
        .build()
        .unwrap();

    for id in 1..=3 {
        pipeline.on_span_completed(span(id));
    }
    let (first, second) = tokio::join!(pipeline.force_flush(), pipeline.force_flush());

    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(recorder.batches(), vec![vec![1, 2], vec![3]]);
    assert_eq!(pipeline.metrics().batches_exported, 2);

    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failing_exporter_is_isolated() {
    init_test_logging();
    let failing = FailingExporter::new();
    let recorder = RecordingExporter::new();
    let pipeline = BatchSpanPipeline::builder()
        .with_config(config(8, 4, Duration::from_secs(60)))
        .with_exporter(failing.clone())
        .with_exporter(recorder.clone())
        .build()
        .unwrap();

    pipeline.on_span_completed(span(1));
    let report = pipeline.force_flush().await.unwrap();
    assert_eq!(report.failed_exports, 1);
    assert!(!report.is_clean());

    pipeline.on_span_completed(span(2));
    pipeline.force_flush().await.unwrap();

    assert_eq!(failing.calls(), 2);
    assert_eq!(recorder.batches(), vec![vec![1], vec![2]]);

    let metrics = pipeline.metrics();
    assert_eq!(metrics.export_failures, 2);
    assert_eq!(metrics.spans_exported, 2);
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_single_span_exported_within_schedule_delay() {
    let recorder = RecordingExporter::new();
    let pipeline = BatchSpanPipeline::builder()
        .with_config(config(2048, 512, Duration::from_secs(5)))
        .with_exporter(recorder.clone())
        .build()
        .unwrap();

    pipeline.on_span_completed(span(7));

    tokio::time::sleep(Duration::from_millis(4900)).await;
    assert!(recorder.batches().is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(recorder.batches(), vec![vec![7]]);

    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_full_batch_wakes_idle_controller() {
    let recorder = RecordingExporter::new();
    let pipeline = BatchSpanPipeline::builder()
        .with_config(config(64, 4, Duration::from_secs(60)))
        .with_exporter(recorder.clone())
        .build()
        .unwrap();

    // Let the controller go idle.
    tokio::time::sleep(Duration::from_millis(10)).await;
    for id in 0..4 {
        pipeline.on_span_completed(span(id));
    }
    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(recorder.batches(), vec![vec![0, 1, 2, 3]]);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_overflow_drops_and_counts() {
    let recorder = RecordingExporter::new();
    let pipeline = BatchSpanPipeline::builder()
        .with_config(config(4, 4, Duration::from_secs(60)))
        .with_exporter(recorder.clone())
        .build()
        .unwrap();

    // The controller cannot run until this task yields.
    let accepted = (0..6).filter(|&id| pipeline.on_span_completed(span(id))).count();

    assert_eq!(accepted, 4);
    assert_eq!(pipeline.queue_occupancy(), 4);
    let metrics = pipeline.metrics();
    assert_eq!(metrics.spans_dropped, 2);
    assert_eq!(metrics.queue_occupancy, 4);

    pipeline.shutdown().await;
    assert_eq!(recorder.span_ids(), vec![0, 1, 2, 3]);
    assert_eq!(pipeline.metrics().spans_exported, 4);
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    init_test_logging();
    let failing = FailingExporter::new();
    let recorder = RecordingExporter::new();
    let pipeline = Arc::new(
        BatchSpanPipeline::builder()
            .with_exporter(failing.clone())
            .with_exporter(recorder.clone())
            .build()
            .unwrap(),
    );

    pipeline.on_span_completed(span(1));
    let other = Arc::clone(&pipeline);
    tokio::join!(pipeline.shutdown(), other.shutdown());
    pipeline.shutdown().await;

    assert_eq!(failing.shutdown_count(), 1);
    assert_eq!(recorder.shutdown_count(), 1);
    assert_eq!(recorder.batches(), vec![vec![1]]);
    assert_eq!(pipeline.state(), ControllerState::Stopped);
    assert_eq!(pipeline.metrics().shutdown_failures, 1);

    assert!(!pipeline.on_span_completed(span(2)));
    assert_eq!(pipeline.metrics().spans_dropped, 1);
    assert_eq!(pipeline.force_flush().await, Err(PipelineError::ShutDown));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_stuck_export() {
    let hanging = HangingExporter::default();
    let pipeline = BatchSpanPipeline::builder()
        .with_config(
            config(8, 1, Duration::from_millis(100))
                .with_export_timeout(Duration::from_secs(600))
                .with_shutdown_timeout(Duration::from_secs(1)),
        )
        .with_exporter(hanging.clone())
        .build()
        .unwrap();

    pipeline.on_span_completed(span(1));
    hanging.entered.notified().await;

    let start = tokio::time::Instant::now();
    pipeline.shutdown().await;

    assert!(start.elapsed() >= Duration::from_secs(1));
    assert_eq!(pipeline.state(), ControllerState::Stopped);
    // The in-flight batch was discarded, not re-offered.
    assert_eq!(pipeline.metrics().spans_exported, 0);
}

#[tokio::test(start_paused = true)]
async fn test_drop_fails_pending_flush() {
    let hanging = HangingExporter::default();
    let pipeline = BatchSpanPipeline::builder()
        .with_config(config(8, 8, Duration::from_secs(60)))
        .with_exporter(hanging.clone())
        .build()
        .unwrap();

    pipeline.on_span_completed(span(1));
    let flush = tokio::spawn(pipeline.force_flush());
    hanging.entered.notified().await;

    drop(pipeline);
    assert_eq!(flush.await.unwrap(), Err(PipelineError::ShutDown));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_producers_no_loss_no_duplication() {
    const PRODUCERS: u64 = 4;
    const PER_PRODUCER: u64 = 2_000;

    let recorder = RecordingExporter::new();
    let pipeline = Arc::new(
        BatchSpanPipeline::builder()
            .with_config(config(8192, 128, Duration::from_millis(10)))
            .with_exporter(recorder.clone())
            .build()
            .unwrap(),
    );

    let handles: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let pipeline = Arc::clone(&pipeline);
            std::thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    let id = (producer << 32) | seq;
                    assert!(pipeline.on_span_completed(Span::new(1, id, "op", SpanKind::Client)));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    pipeline.shutdown().await;

    let ids = recorder.span_ids();
    assert_eq!(ids.len() as u64, PRODUCERS * PER_PRODUCER);
    for producer in 0..PRODUCERS {
        let seqs: Vec<u64> = ids
            .iter()
            .filter(|&&id| id >> 32 == producer)
            .map(|&id| id & 0xFFFF_FFFF)
            .collect();
        assert_eq!(seqs, (0..PER_PRODUCER).collect::<Vec<_>>(), "producer {producer}");
    }
    assert_eq!(pipeline.metrics().spans_dropped, 0);
}

/// Spawns producers that offer spans until `stop` is set. Each returns its
/// (accepted, rejected) counts.
fn spawn_producers(
    pipeline: &Arc<BatchSpanPipeline>,
    producers: u64,
    stop: &Arc<AtomicBool>,
    accepted_total: &Arc<AtomicU64>,
) -> Vec<std::thread::JoinHandle<(u64, u64)>> {
    (0..producers)
        .map(|producer| {
            let pipeline = Arc::clone(pipeline);
            let stop = Arc::clone(stop);
            let accepted_total = Arc::clone(accepted_total);
            std::thread::spawn(move || {
                let (mut accepted, mut rejected) = (0, 0);
                let mut seq = 0;
                while !stop.load(Ordering::Relaxed) {
                    let id = (producer << 32) | seq;
                    seq += 1;
                    if pipeline.on_span_completed(Span::new(1, id, "op", SpanKind::Producer)) {
                        accepted += 1;
                        accepted_total.fetch_add(1, Ordering::SeqCst);
                    } else {
                        rejected += 1;
                    }
                }
                (accepted, rejected)
            })
        })
        .collect()
}

fn assert_unique(ids: &[u64]) {
    let unique: HashSet<u64> = ids.iter().copied().collect();
    assert_eq!(unique.len(), ids.len(), "a span was exported twice");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_while_producers_enqueue_loses_no_accepted_span() {
    init_test_logging();
    let recorder = RecordingExporter::new();
    let pipeline = Arc::new(
        BatchSpanPipeline::builder()
            .with_config(config(1024, 64, Duration::from_millis(5)))
            .with_exporter(recorder.clone())
            .build()
            .unwrap(),
    );
    let stop = Arc::new(AtomicBool::new(false));
    let accepted_total = Arc::new(AtomicU64::new(0));
    let producers = spawn_producers(&pipeline, 8, &stop, &accepted_total);

    tokio::time::sleep(Duration::from_millis(20)).await;
    pipeline.shutdown().await;
    // Keep offering past shutdown so late offers race the final drain.
    tokio::time::sleep(Duration::from_millis(5)).await;
    stop.store(true, Ordering::Relaxed);

    let (mut accepted, mut rejected) = (0, 0);
    for handle in producers {
        let (a, r) = handle.join().unwrap();
        accepted += a;
        rejected += r;
    }

    let ids = recorder.span_ids();
    assert_unique(&ids);
    assert_eq!(ids.len() as u64, accepted);
    let metrics = pipeline.metrics();
    assert_eq!(metrics.spans_exported, accepted);
    assert_eq!(metrics.spans_dropped, rejected);
    assert_eq!(pipeline.queue_occupancy(), 0);
    assert_eq!(pipeline.state(), ControllerState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_flush_while_producers_enqueue_covers_prior_spans() {
    init_test_logging();
    let recorder = RecordingExporter::new();
    let pipeline = Arc::new(
        BatchSpanPipeline::builder()
            .with_config(config(4096, 32, Duration::from_secs(60)))
            .with_exporter(recorder.clone())
            .build()
            .unwrap(),
    );
    let stop = Arc::new(AtomicBool::new(false));
    let accepted_total = Arc::new(AtomicU64::new(0));
    let producers = spawn_producers(&pipeline, 4, &stop, &accepted_total);

    for _ in 0..20 {
        let before = accepted_total.load(Ordering::SeqCst);
        pipeline.force_flush().await.unwrap();
        let exported = recorder.span_ids().len() as u64;
        assert!(exported >= before, "flush resolved with {exported} of {before} spans exported");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    stop.store(true, Ordering::Relaxed);
    let accepted: u64 = producers.into_iter().map(|h| h.join().unwrap().0).sum();
    pipeline.shutdown().await;

    let ids = recorder.span_ids();
    assert_unique(&ids);
    assert_eq!(ids.len() as u64, accepted);
}
