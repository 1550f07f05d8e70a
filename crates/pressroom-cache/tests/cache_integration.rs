//! Integration tests for pressroom-cache: single-flight computation and TTL behaviour.

use pressroom_cache::{fingerprint, CacheOutcome, ResultCache};
use pressroom_core::{ApiError, PressroomError, PressroomResult};
use pressroom_metrics::MetricsRegistry;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Stand-in for a slow model call that counts invocations.
struct SlowModel {
    calls: AtomicU32,
    latency: Duration,
}

impl SlowModel {
    fn new(latency: Duration) -> Self {
        Self {
            calls: AtomicU32::new(0),
            latency,
        }
    }

    async fn strategy(&self, doc: &str) -> PressroomResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        Ok(json!({"document": doc, "topics": ["nutrition", "sleep"]}))
    }
}

fn strategy_key(doc: &str) -> Value {
    json!({
        "step": "strategy",
        "document_id": doc,
        "params": {"model": "test-model", "temperature": 0.7},
        "cache_version": 1
    })
}

// --- Single flight ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_concurrent_requests_make_one_call() {
    let metrics = Arc::new(MetricsRegistry::new());
    let cache = Arc::new(ResultCache::new(100, metrics.clone()));
    let model = Arc::new(SlowModel::new(Duration::from_millis(200)));

    let request = |cache: Arc<ResultCache>, model: Arc<SlowModel>| async move {
        cache
            .get_or_compute("strategy", &strategy_key("doc1"), Duration::from_secs(60), || {
                let model = model.clone();
                async move { model.strategy("doc1").await }
            })
            .await
    };

    let (a, b) = tokio::join!(
        tokio::spawn(request(cache.clone(), model.clone())),
        tokio::spawn(request(cache.clone(), model.clone())),
    );
    let (value_a, outcome_a) = a.unwrap().unwrap();
    let (value_b, outcome_b) = b.unwrap().unwrap();

    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    assert_eq!(value_a, value_b);
    let mut outcomes = [outcome_a, outcome_b];
    outcomes.sort_by_key(|o| *o == CacheOutcome::Miss);
    assert!(outcomes[0].is_hit());
    assert_eq!(outcomes[1], CacheOutcome::Miss);

    assert_eq!(metrics.counter("cache.misses", &[("step", "strategy")]), Some(1));
    assert_eq!(metrics.counter_total("cache.hits"), 1);
}

#[tokio::test]
async fn test_distinct_documents_compute_independently() {
    let cache = ResultCache::new(100, Arc::new(MetricsRegistry::new()));
    let model = SlowModel::new(Duration::ZERO);

    for doc in ["doc1", "doc2", "doc1", "doc2"] {
        cache
            .get_or_compute("strategy", &strategy_key(doc), Duration::from_secs(60), || {
                model.strategy(doc)
            })
            .await
            .unwrap();
    }
    assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.stats().hits, 2);
}

// --- TTL ---

#[tokio::test(start_paused = true)]
async fn test_lookup_after_ttl_recomputes_exactly_once() {
    let cache = ResultCache::new(100, Arc::new(MetricsRegistry::new()));
    let model = SlowModel::new(Duration::ZERO);
    let ttl = Duration::from_secs(30);

    let (_, first) = cache
        .get_or_compute("strategy", &strategy_key("doc1"), ttl, || model.strategy("doc1"))
        .await
        .unwrap();
    assert_eq!(first, CacheOutcome::Miss);

    tokio::time::advance(Duration::from_secs(29)).await;
    let (_, before_expiry) = cache
        .get_or_compute("strategy", &strategy_key("doc1"), ttl, || model.strategy("doc1"))
        .await
        .unwrap();
    assert_eq!(before_expiry, CacheOutcome::Hit);

    tokio::time::advance(Duration::from_secs(1)).await;
    let (_, after_expiry) = cache
        .get_or_compute("strategy", &strategy_key("doc1"), ttl, || model.strategy("doc1"))
        .await
        .unwrap();
    assert_eq!(after_expiry, CacheOutcome::Miss);
    assert_eq!(model.calls.load(Ordering::SeqCst), 2);
}

// --- Errors ---

#[tokio::test]
async fn test_api_failure_surfaces_through_cache_error() {
    let metrics = Arc::new(MetricsRegistry::new());
    let cache = ResultCache::new(100, metrics.clone());

    let err = cache
        .get_or_compute("writer", &strategy_key("doc9"), Duration::from_secs(60), || async {
            Err(PressroomError::Api(ApiError::from_status(401, "invalid key")))
        })
        .await
        .unwrap_err();

    assert_eq!(err.api_error().map(|e| e.status), Some(Some(401)));
    assert!(err.to_string().contains(&fingerprint(&strategy_key("doc9"))));
    assert_eq!(metrics.counter("cache.errors", &[("step", "writer")]), Some(1));
    assert!(cache.inspect(&strategy_key("doc9")).is_none());
}
