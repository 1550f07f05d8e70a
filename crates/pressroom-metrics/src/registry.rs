use crate::snapshot::{HistogramBucket, HistogramSnapshot, MetricSample, MetricValue, MetricsSnapshot};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Default histogram bucket upper bounds, in milliseconds.
pub const DEFAULT_BUCKETS: &[f64] = &[
    10.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 2_000.0, 5_000.0, 10_000.0, 30_000.0, 60_000.0,
];

/// Identity of a metric: its name plus the sorted tag set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    name: String,
    tags: Vec<(String, String)>,
}

impl MetricKey {
    /// Build a key; tag order does not matter, later duplicates win.
    pub fn new(name: &str, tags: &[(&str, &str)]) -> Self {
        let sorted: BTreeMap<String, String> = tags
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self {
            name: name.to_string(),
            tags: sorted.into_iter().collect(),
        }
    }

    /// Metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sorted tags.
    pub fn tags(&self) -> &[(String, String)] {
        &self.tags
    }

    /// `name{k=v,k2=v2}`, or just `name` when untagged.
    pub fn render(&self) -> String {
        if self.tags.is_empty() {
            return self.name.clone();
        }
        let tags: Vec<String> = self.tags.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("{}{{{}}}", self.name, tags.join(","))
    }
}

#[derive(Debug, Clone)]
struct HistogramState {
    bounds: Arc<[f64]>,
    counts: Vec<u64>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl HistogramState {
    fn new(bounds: Arc<[f64]>) -> Self {
        let slots = bounds.len() + 1;
        Self {
            bounds,
            counts: vec![0; slots],
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn observe(&mut self, value: f64) {
        let slot = self
            .bounds
            .iter()
            .position(|bound| value <= *bound)
            .unwrap_or(self.bounds.len());
        self.counts[slot] += 1;
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        let buckets = self
            .counts
            .iter()
            .enumerate()
            .map(|(i, count)| HistogramBucket {
                upper_bound: self.bounds.get(i).copied(),
                count: *count,
            })
            .collect();
        HistogramSnapshot {
            count: self.count,
            sum: self.sum,
            min: if self.count == 0 { 0.0 } else { self.min },
            max: if self.count == 0 { 0.0 } else { self.max },
            buckets,
        }
    }
}

#[derive(Debug, Clone)]
enum MetricState {
    Counter(u64),
    Gauge(f64),
    Histogram(HistogramState),
}

impl MetricState {
    fn type_name(&self) -> &'static str {
        match self {
            MetricState::Counter(_) => "counter",
            MetricState::Gauge(_) => "gauge",
            MetricState::Histogram(_) => "histogram",
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    state: MetricState,
    updated_at: DateTime<Utc>,
}

/// Process-wide metric store.
///
/// Created once at startup and shared as `Arc<MetricsRegistry>`. Values only
/// go away through [`MetricsRegistry::reset`]; exports read a
/// [`MetricsSnapshot`] copy so sinks never observe a half-applied update.
pub struct MetricsRegistry {
    metrics: RwLock<HashMap<MetricKey, Entry>>,
    buckets: Arc<[f64]>,
}

impl MetricsRegistry {
    /// Create an empty registry with [`DEFAULT_BUCKETS`].
    pub fn new() -> Self {
        Self::with_buckets(DEFAULT_BUCKETS.to_vec())
    }

    /// Create an empty registry with custom histogram bucket bounds.
    pub fn with_buckets(mut buckets: Vec<f64>) -> Self {
        buckets.retain(|b| b.is_finite());
        buckets.sort_by(f64::total_cmp);
        buckets.dedup();
        Self {
            metrics: RwLock::new(HashMap::new()),
            buckets: buckets.into(),
        }
    }

    /// Add one to a counter.
    pub fn increment(&self, name: &str, tags: &[(&str, &str)]) {
        self.increment_by(name, tags, 1);
    }

    /// Add `delta` to a counter.
    pub fn increment_by(&self, name: &str, tags: &[(&str, &str)], delta: u64) {
        self.update(name, tags, || MetricState::Counter(0), |state| match state {
            MetricState::Counter(v) => {
                *v = v.saturating_add(delta);
                true
            }
            _ => false,
        });
    }

    /// Set a gauge to `value`.
    pub fn set_gauge(&self, name: &str, tags: &[(&str, &str)], value: f64) {
        self.update(name, tags, || MetricState::Gauge(0.0), |state| match state {
            MetricState::Gauge(v) => {
                *v = value;
                true
            }
            _ => false,
        });
    }

    /// Add `delta` (possibly negative) to a gauge.
    pub fn add_gauge(&self, name: &str, tags: &[(&str, &str)], delta: f64) {
        self.update(name, tags, || MetricState::Gauge(0.0), |state| match state {
            MetricState::Gauge(v) => {
                *v += delta;
                true
            }
            _ => false,
        });
    }

    /// Record one observation in a histogram.
    pub fn observe(&self, name: &str, tags: &[(&str, &str)], value: f64) {
        let buckets = self.buckets.clone();
        self.update(
            name,
            tags,
            || MetricState::Histogram(HistogramState::new(buckets)),
            |state| match state {
                MetricState::Histogram(h) => {
                    h.observe(value);
                    true
                }
                _ => false,
            },
        );
    }

    /// Record a duration in milliseconds.
    pub fn observe_duration(&self, name: &str, tags: &[(&str, &str)], elapsed: Duration) {
        self.observe(name, tags, elapsed.as_secs_f64() * 1000.0);
    }

    /// Start a wall-clock timer that records into the histogram `name`.
    pub fn start_timer(self: &Arc<Self>, name: &str) -> Timer {
        Timer {
            registry: Arc::clone(self),
            name: name.to_string(),
            started: Instant::now(),
        }
    }

    fn update<I, F>(&self, name: &str, tags: &[(&str, &str)], init: I, apply: F)
    where
        I: FnOnce() -> MetricState,
        F: FnOnce(&mut MetricState) -> bool,
    {
        let key = MetricKey::new(name, tags);
        let mut metrics = self.metrics.write();
        let entry = metrics.entry(key).or_insert_with(|| Entry {
            state: init(),
            updated_at: Utc::now(),
        });
        let existing = entry.state.type_name();
        if apply(&mut entry.state) {
            entry.updated_at = Utc::now();
        } else {
            warn!(metric = name, existing, "Metric type mismatch, update ignored");
        }
    }

    /// Current value of a counter.
    pub fn counter(&self, name: &str, tags: &[(&str, &str)]) -> Option<u64> {
        let metrics = self.metrics.read();
        match metrics.get(&MetricKey::new(name, tags)).map(|e| &e.state) {
            Some(MetricState::Counter(v)) => Some(*v),
            _ => None,
        }
    }

    /// Sum of a counter across every tag set.
    pub fn counter_total(&self, name: &str) -> u64 {
        let metrics = self.metrics.read();
        metrics
            .iter()
            .filter(|(key, _)| key.name == name)
            .filter_map(|(_, e)| match e.state {
                MetricState::Counter(v) => Some(v),
                _ => None,
            })
            .sum()
    }

    /// Current value of a gauge.
    pub fn gauge(&self, name: &str, tags: &[(&str, &str)]) -> Option<f64> {
        let metrics = self.metrics.read();
        match metrics.get(&MetricKey::new(name, tags)).map(|e| &e.state) {
            Some(MetricState::Gauge(v)) => Some(*v),
            _ => None,
        }
    }

    /// Current state of a histogram.
    pub fn histogram(&self, name: &str, tags: &[(&str, &str)]) -> Option<HistogramSnapshot> {
        let metrics = self.metrics.read();
        match metrics.get(&MetricKey::new(name, tags)).map(|e| &e.state) {
            Some(MetricState::Histogram(h)) => Some(h.snapshot()),
            _ => None,
        }
    }

    /// Number of distinct metric identities.
    pub fn len(&self) -> usize {
        self.metrics.read().len()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.metrics.read().is_empty()
    }

    /// Copy every metric into an immutable snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let metrics = self.metrics.read();
        let samples = metrics
            .iter()
            .map(|(key, entry)| {
                let value = match &entry.state {
                    MetricState::Counter(v) => MetricValue::Counter { value: *v },
                    MetricState::Gauge(v) => MetricValue::Gauge { value: *v },
                    MetricState::Histogram(h) => MetricValue::Histogram(h.snapshot()),
                };
                let sample = MetricSample {
                    name: key.name.clone(),
                    tags: key.tags.iter().cloned().collect(),
                    value,
                    timestamp: entry.updated_at,
                };
                (key.render(), sample)
            })
            .collect();
        MetricsSnapshot {
            taken_at: Utc::now(),
            metrics: samples,
        }
    }

    /// Drop every recorded value. Operator action only.
    pub fn reset(&self) {
        self.metrics.write().clear();
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Measures elapsed wall-clock time into a histogram.
pub struct Timer {
    registry: Arc<MetricsRegistry>,
    name: String,
    started: Instant,
}

impl Timer {
    /// Time elapsed so far.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Record the elapsed time with `tags` and return it.
    pub fn stop(self, tags: &[(&str, &str)]) -> Duration {
        let elapsed = self.started.elapsed();
        self.registry.observe_duration(&self.name, tags, elapsed);
        elapsed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_tag_order_independent() {
        let a = MetricKey::new("calls", &[("model", "m1"), ("step", "writer")]);
        let b = MetricKey::new("calls", &[("step", "writer"), ("model", "m1")]);
        assert_eq!(a, b);
        assert_eq!(a.render(), "calls{model=m1,step=writer}");
        assert_eq!(MetricKey::new("plain", &[]).render(), "plain");
    }

    #[test]
    fn test_counter_accumulates_per_tag_set() {
        let registry = MetricsRegistry::new();
        registry.increment("cache.hits", &[("step", "strategy")]);
        registry.increment("cache.hits", &[("step", "strategy")]);
        registry.increment_by("cache.hits", &[("step", "writer")], 5);

        assert_eq!(registry.counter("cache.hits", &[("step", "strategy")]), Some(2));
        assert_eq!(registry.counter("cache.hits", &[("step", "writer")]), Some(5));
        assert_eq!(registry.counter("cache.hits", &[("step", "social")]), None);
        assert_eq!(registry.counter_total("cache.hits"), 7);
    }

    #[test]
    fn test_gauge_set_and_add() {
        let registry = MetricsRegistry::new();
        registry.add_gauge("jobs.running", &[], 1.0);
        registry.add_gauge("jobs.running", &[], 1.0);
        registry.add_gauge("jobs.running", &[], -1.0);
        assert_eq!(registry.gauge("jobs.running", &[]), Some(1.0));
        registry.set_gauge("jobs.running", &[], 0.0);
        assert_eq!(registry.gauge("jobs.running", &[]), Some(0.0));
    }

    #[test]
    fn test_histogram_buckets() {
        let registry = MetricsRegistry::with_buckets(vec![100.0, 10.0, 1000.0]);
        for v in [5.0, 10.0, 50.0, 500.0, 5000.0] {
            registry.observe("latency", &[], v);
        }
        let h = registry.histogram("latency", &[]).unwrap();
        assert_eq!(h.count, 5);
        assert_eq!(h.sum, 5565.0);
        assert_eq!(h.min, 5.0);
        assert_eq!(h.max, 5000.0);
        let counts: Vec<u64> = h.buckets.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![2, 1, 1, 1]);
        assert_eq!(h.buckets[0].upper_bound, Some(10.0));
        assert_eq!(h.buckets[3].upper_bound, None);
    }

    #[test]
    fn test_type_mismatch_is_ignored() {
        let registry = MetricsRegistry::new();
        registry.increment("mixed", &[]);
        registry.observe("mixed", &[], 3.0);
        assert_eq!(registry.counter("mixed", &[]), Some(1));
        assert!(registry.histogram("mixed", &[]).is_none());
    }

    #[test]
    fn test_snapshot_is_detached_copy() {
        let registry = MetricsRegistry::new();
        registry.increment("calls", &[("model", "m")]);
        let snapshot = registry.snapshot();
        registry.increment("calls", &[("model", "m")]);

        let sample = &snapshot.metrics["calls{model=m}"];
        assert_eq!(sample.value, MetricValue::Counter { value: 1 });
        assert_eq!(registry.counter("calls", &[("model", "m")]), Some(2));
    }

    #[test]
    fn test_reset_clears_everything() {
        let registry = MetricsRegistry::new();
        registry.increment("a", &[]);
        registry.observe("b", &[], 1.0);
        assert_eq!(registry.len(), 2);
        registry.reset();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_timer_records_duration() {
        let registry = Arc::new(MetricsRegistry::new());
        let timer = registry.start_timer("step.duration_ms");
        let elapsed = timer.stop(&[("step", "writer")]);
        let h = registry.histogram("step.duration_ms", &[("step", "writer")]).unwrap();
        assert_eq!(h.count, 1);
        assert!(h.sum >= 0.0);
        assert!(elapsed.as_secs() < 5);
    }
}
