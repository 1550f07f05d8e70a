use crate::snapshot::{MetricValue, MetricsSnapshot};
use async_trait::async_trait;
use chrono::Utc;
use pressroom_core::{PressroomError, PressroomResult};
use std::path::PathBuf;
use tracing::{debug, info};

/// Destination for periodic metric exports.
///
/// Sinks are invoked independently; an error from one sink is logged and
/// never prevents the others from receiving the snapshot.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Short identifier used in logs and metric tags.
    fn name(&self) -> &str;

    /// Deliver one snapshot.
    async fn export(&self, snapshot: &MetricsSnapshot) -> PressroomResult<()>;
}

/// Writes each snapshot to `metrics_<timestamp>.json` under a directory.
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    /// Create a sink writing under `dir` (created on first export).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl MetricsSink for JsonFileSink {
    fn name(&self) -> &str {
        "json_file"
    }

    async fn export(&self, snapshot: &MetricsSnapshot) -> PressroomResult<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(PressroomError::Io)?;

        let filename = format!("metrics_{}.json", Utc::now().format("%Y%m%d_%H%M%S_%6f"));
        let path = self.dir.join(filename);
        let json = serde_json::to_string_pretty(snapshot)?;
        tokio::fs::write(&path, json)
            .await
            .map_err(PressroomError::Io)?;

        debug!(path = %path.display(), metrics = snapshot.len(), "Metrics exported");
        Ok(())
    }
}

/// Logs a one-line summary of each snapshot, and every sample at debug level.
#[derive(Default)]
pub struct TracingSink;

#[async_trait]
impl MetricsSink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn export(&self, snapshot: &MetricsSnapshot) -> PressroomResult<()> {
        info!(metrics = snapshot.len(), taken_at = %snapshot.taken_at, "Metrics snapshot");
        for (key, sample) in &snapshot.metrics {
            match &sample.value {
                MetricValue::Counter { value } => debug!(metric = %key, value, "counter"),
                MetricValue::Gauge { value } => debug!(metric = %key, value, "gauge"),
                MetricValue::Histogram(h) => debug!(
                    metric = %key,
                    count = h.count,
                    mean = h.mean(),
                    max = h.max,
                    "histogram"
                ),
            }
        }
        Ok(())
    }
}
