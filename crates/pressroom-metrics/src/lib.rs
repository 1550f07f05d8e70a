//! Runtime metrics for Pressroom.
//!
//! A single [`MetricsRegistry`] is created at startup and shared as an `Arc`
//! by the gateway, cache, and orchestrator. Values accumulate for the life of
//! the process and leave only through an explicit [`MetricsRegistry::reset`].
//! The [`MetricsExporter`] periodically hands a [`MetricsSnapshot`] copy to
//! every registered [`MetricsSink`].
//!
//! # Main types
//!
//! - [`MetricsRegistry`]: Counters, gauges, and histograms keyed by name and tags.
//! - [`MetricsSnapshot`]: Immutable copy of the registry taken for export.
//! - [`MetricsSink`]: Export destination trait, with [`JsonFileSink`] and [`TracingSink`].
//! - [`MetricsExporter`]: Interval-driven fan-out to sinks.

/// Interval-driven snapshot export.
pub mod exporter;
/// The metric store.
pub mod registry;
/// Export destinations.
pub mod sink;
/// Serializable snapshot types.
pub mod snapshot;

pub use exporter::{ExportSummary, MetricsExporter};
pub use registry::{MetricKey, MetricsRegistry, Timer, DEFAULT_BUCKETS};
pub use sink::{JsonFileSink, MetricsSink, TracingSink};
pub use snapshot::{HistogramBucket, HistogramSnapshot, MetricSample, MetricValue, MetricsSnapshot};
