use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One histogram bucket; `upper_bound: None` is the overflow bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBucket {
    /// Inclusive upper bound of the bucket.
    pub upper_bound: Option<f64>,
    /// Observations that fell into this bucket (not cumulative).
    pub count: u64,
}

/// Accumulated state of a histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    /// Number of observations.
    pub count: u64,
    /// Sum of observations.
    pub sum: f64,
    /// Smallest observation, 0 when empty.
    pub min: f64,
    /// Largest observation, 0 when empty.
    pub max: f64,
    /// Per-bucket counts.
    pub buckets: Vec<HistogramBucket>,
}

impl HistogramSnapshot {
    /// Arithmetic mean, 0 when empty.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Value of a metric at snapshot time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetricValue {
    /// Monotonic counter.
    Counter {
        /// Current count.
        value: u64,
    },
    /// Point-in-time value.
    Gauge {
        /// Current value.
        value: f64,
    },
    /// Distribution.
    Histogram(HistogramSnapshot),
}

/// One metric identity and its value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Metric name without tags.
    pub name: String,
    /// Tag set.
    pub tags: BTreeMap<String, String>,
    /// Type and value.
    #[serde(flatten)]
    pub value: MetricValue,
    /// Last update time.
    pub timestamp: DateTime<Utc>,
}

/// Read-only copy of the registry handed to export sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// When the copy was taken.
    pub taken_at: DateTime<Utc>,
    /// Samples keyed by rendered identity (`name{k=v}`).
    pub metrics: BTreeMap<String, MetricSample>,
}

impl MetricsSnapshot {
    /// Counter value summed across every tag set of `name`.
    pub fn counter_total(&self, name: &str) -> u64 {
        self.metrics
            .values()
            .filter(|s| s.name == name)
            .filter_map(|s| match s.value {
                MetricValue::Counter { value } => Some(value),
                _ => None,
            })
            .sum()
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// True when the snapshot carries no samples.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}
