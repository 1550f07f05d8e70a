//! Integration tests for pressroom-metrics: registry accumulation and sink isolation.

use async_trait::async_trait;
use pressroom_core::{PressroomError, PressroomResult};
use pressroom_metrics::{
    JsonFileSink, MetricValue, MetricsExporter, MetricsRegistry, MetricsSink, MetricsSnapshot,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

struct BrokenSink {
    calls: AtomicU32,
}

#[async_trait]
impl MetricsSink for BrokenSink {
    fn name(&self) -> &str {
        "broken"
    }

    async fn export(&self, _snapshot: &MetricsSnapshot) -> PressroomResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(PressroomError::Config("sink endpoint unreachable".into()))
    }
}

#[derive(Default)]
struct CollectingSink {
    snapshots: Mutex<Vec<MetricsSnapshot>>,
}

#[async_trait]
impl MetricsSink for CollectingSink {
    fn name(&self) -> &str {
        "collecting"
    }

    async fn export(&self, snapshot: &MetricsSnapshot) -> PressroomResult<()> {
        self.snapshots.lock().await.push(snapshot.clone());
        Ok(())
    }
}

// --- Sink isolation ---

#[tokio::test(start_paused = true)]
async fn test_broken_sink_never_starves_healthy_sink() {
    let registry = Arc::new(MetricsRegistry::new());
    let broken = Arc::new(BrokenSink {
        calls: AtomicU32::new(0),
    });
    let collecting = Arc::new(CollectingSink::default());

    let exporter = MetricsExporter::new(registry.clone(), Duration::from_secs(60))
        .with_sink(broken.clone())
        .with_sink(collecting.clone());
    let cancel = CancellationToken::new();
    let handle = exporter.spawn(cancel.clone());

    // Simulated run activity before the first interval elapses.
    for _ in 0..4 {
        registry.increment("gateway.calls", &[("model", "test-model")]);
        registry.observe(
            "gateway.response_time_ms",
            &[("model", "test-model"), ("status_code", "200")],
            120.0,
        );
    }
    registry.increment("jobs.completed", &[("status", "succeeded")]);

    tokio::time::sleep(Duration::from_secs(61)).await;

    {
        let snapshots = collecting.snapshots.lock().await;
        assert_eq!(snapshots.len(), 1);
        let snapshot = &snapshots[0];
        assert_eq!(snapshot.counter_total("gateway.calls"), 4);
        assert_eq!(snapshot.counter_total("jobs.completed"), 1);
        match &snapshot.metrics["gateway.response_time_ms{model=test-model,status_code=200}"].value {
            MetricValue::Histogram(h) => assert_eq!(h.count, 4),
            other => panic!("expected histogram, got {other:?}"),
        }
    }
    assert_eq!(broken.calls.load(Ordering::SeqCst), 1);

    cancel.cancel();
    handle.await.unwrap();

    // Export failures are visible but never remove run metrics.
    assert_eq!(registry.counter("metrics.export_errors", &[("sink", "broken")]), Some(2));
    assert_eq!(registry.counter_total("gateway.calls"), 4);
}

// --- File sink ---

#[tokio::test]
async fn test_json_file_sink_through_exporter() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(MetricsRegistry::new());
    registry.set_gauge("orchestrator.running_jobs", &[], 2.0);

    let exporter = MetricsExporter::new(registry, Duration::from_secs(60))
        .with_sink(Arc::new(JsonFileSink::new(dir.path())));
    let summary = exporter.export_once().await;
    assert_eq!(summary.delivered, vec!["json_file".to_string()]);
    assert!(summary.failed.is_empty());

    let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(files.len(), 1);
    let content = std::fs::read_to_string(files[0].as_ref().unwrap().path()).unwrap();
    let json: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(json["metrics"]["orchestrator.running_jobs"]["type"], "gauge");
    assert_eq!(json["metrics"]["orchestrator.running_jobs"]["value"], 2.0);
}
