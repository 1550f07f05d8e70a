use crate::registry::MetricsRegistry;
use crate::sink::MetricsSink;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outcome of one export round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    /// Sinks that accepted the snapshot.
    pub delivered: Vec<String>,
    /// Sinks that failed, with the error message.
    pub failed: Vec<(String, String)>,
}

/// Pushes registry snapshots to every registered sink on a fixed interval.
pub struct MetricsExporter {
    registry: Arc<MetricsRegistry>,
    sinks: Vec<Arc<dyn MetricsSink>>,
    interval: Duration,
    sink_timeout: Duration,
}

impl MetricsExporter {
    /// Create an exporter with no sinks.
    pub fn new(registry: Arc<MetricsRegistry>, interval: Duration) -> Self {
        Self {
            registry,
            sinks: Vec::new(),
            interval,
            sink_timeout: Duration::from_secs(10),
        }
    }

    /// Register a sink.
    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Bound how long a single sink may take per export.
    pub fn with_sink_timeout(mut self, timeout: Duration) -> Self {
        self.sink_timeout = timeout;
        self
    }

    /// Number of registered sinks.
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Take one snapshot and deliver it to every sink concurrently.
    pub async fn export_once(&self) -> ExportSummary {
        let snapshot = Arc::new(self.registry.snapshot());

        let deliveries = self.sinks.iter().map(|sink| {
            let snapshot = Arc::clone(&snapshot);
            let sink = Arc::clone(sink);
            let timeout = self.sink_timeout;
            async move {
                let name = sink.name().to_string();
                let result = match tokio::time::timeout(timeout, sink.export(&snapshot)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!("export timed out after {}ms", timeout.as_millis())),
                };
                (name, result)
            }
        });

        let mut summary = ExportSummary::default();
        for (name, result) in join_all(deliveries).await {
            match result {
                Ok(()) => summary.delivered.push(name),
                Err(error) => {
                    warn!(sink = %name, error = %error, "Metrics export failed");
                    self.registry
                        .increment("metrics.export_errors", &[("sink", name.as_str())]);
                    summary.failed.push((name, error));
                }
            }
        }
        summary
    }

    /// Run the export loop until `cancel` fires, then export one final time.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.interval.as_secs(),
                sinks = self.sinks.len(),
                "Metrics exporter started"
            );
            let start = tokio::time::Instant::now() + self.interval;
            let mut ticker = tokio::time::interval_at(start, self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.export_once().await;
                    }
                }
            }

            self.export_once().await;
            info!("Metrics exporter stopped");
        })
    }
}
