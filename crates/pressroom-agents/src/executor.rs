use crate::context::{StepContext, StepInputs, StepOutput};
use crate::step::{CachePolicy, PipelineStep};
use pressroom_cache::{fingerprint, CacheOutcome, ResultCache};
use pressroom_core::{PressroomError, StepError};
use pressroom_metrics::MetricsRegistry;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Outcome of one successful step execution.
#[derive(Debug, Clone)]
pub struct StepRun {
    /// What the step produced.
    pub output: StepOutput,
    /// How the cache served it; `None` for bypassed steps.
    pub cache: Option<CacheOutcome>,
    /// Wall-clock time spent, including any cache wait.
    pub elapsed: Duration,
}

/// Runs steps behind the result cache.
pub struct StepExecutor {
    cache: Arc<ResultCache>,
    ttl: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl StepExecutor {
    /// Create an executor storing results for `ttl`.
    pub fn new(cache: Arc<ResultCache>, ttl: Duration, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            cache,
            ttl,
            metrics,
        }
    }

    /// The cache in use.
    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Key parts identifying a step result, or `None` when the step bypasses the cache.
    pub fn cache_key(
        step: &dyn PipelineStep,
        ctx: &StepContext,
        inputs: &StepInputs,
    ) -> Option<Value> {
        let CachePolicy::Cacheable { version } = step.cache_policy() else {
            return None;
        };
        // Versions restart with every run's ledger while the cache outlives
        // runs, so the coverage itself must be part of the key.
        let theme = if step.reads_shared_state() {
            json!({
                "version": ctx.theme.version,
                "coverage": fingerprint(&json!(ctx.theme.coverage)),
            })
        } else {
            Value::Null
        };
        Some(json!({
            "step": step.name(),
            "document_id": ctx.document.id,
            "inputs": inputs.normalized(),
            "params": ctx.params,
            "cache_version": version,
            "theme": theme,
        }))
    }

    /// Run `step`, serving it from the cache when possible.
    pub async fn execute(
        &self,
        step: &dyn PipelineStep,
        ctx: &StepContext,
        inputs: &StepInputs,
    ) -> Result<StepRun, StepError> {
        let name = step.name();
        let started = Instant::now();

        let result = match Self::cache_key(step, ctx, inputs) {
            None => step.run(ctx, inputs).await.map(|output| (output, None)),
            Some(key) => self.execute_cached(step, ctx, inputs, &key).await,
        };
        let elapsed = started.elapsed();

        match result {
            Ok((output, cache)) => {
                self.metrics.observe_duration(
                    "step.duration_ms",
                    &[("step", name), ("status", "ok")],
                    elapsed,
                );
                debug!(
                    step = name,
                    document_id = %ctx.document.id,
                    cache = ?cache,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Step completed"
                );
                Ok(StepRun {
                    output,
                    cache,
                    elapsed,
                })
            }
            Err(err) => {
                self.metrics.observe_duration(
                    "step.duration_ms",
                    &[("step", name), ("status", "error")],
                    elapsed,
                );
                Err(StepError::new(name, ctx.document.id.clone(), err))
            }
        }
    }

    async fn execute_cached(
        &self,
        step: &dyn PipelineStep,
        ctx: &StepContext,
        inputs: &StepInputs,
        key: &Value,
    ) -> Result<(StepOutput, Option<CacheOutcome>), PressroomError> {
        let (value, outcome) = self
            .cache
            .get_or_compute(step.name(), key, self.ttl, || async move {
                let output = step.run(ctx, inputs).await?;
                Ok(serde_json::to_value(output)?)
            })
            .await?;
        let output: StepOutput = serde_json::from_value(value)?;
        Ok((output, Some(outcome)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pressroom_core::{DocumentRef, ModelParams, PressroomResult};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingStep {
        name: &'static str,
        policy: CachePolicy,
        reads_theme: bool,
        runs: AtomicU32,
        fail: bool,
    }

    impl CountingStep {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                policy: CachePolicy::default(),
                reads_theme: false,
                runs: AtomicU32::new(0),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl PipelineStep for CountingStep {
        fn name(&self) -> &str {
            self.name
        }

        fn cache_policy(&self) -> CachePolicy {
            self.policy
        }

        fn reads_shared_state(&self) -> bool {
            self.reads_theme
        }

        async fn run(&self, ctx: &StepContext, _inputs: &StepInputs) -> PressroomResult<StepOutput> {
            let n = self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PressroomError::Template("unparseable response".into()));
            }
            Ok(StepOutput::new(json!({"doc": ctx.document.id, "run": n})))
        }
    }

    fn executor() -> StepExecutor {
        let metrics = Arc::new(MetricsRegistry::new());
        let cache = Arc::new(ResultCache::new(100, metrics.clone()));
        StepExecutor::new(cache, Duration::from_secs(3600), metrics)
    }

    fn ctx(doc: &str) -> StepContext {
        StepContext::new(
            "run-1",
            DocumentRef::new(doc, format!("/in/{doc}.txt")),
            ModelParams::new("m1"),
        )
    }

    #[tokio::test]
    async fn test_cacheable_step_runs_once() {
        let exec = executor();
        let step = CountingStep::new("strategy");
        let inputs = StepInputs::new();

        let first = exec.execute(&step, &ctx("doc1"), &inputs).await.unwrap();
        let second = exec.execute(&step, &ctx("doc1"), &inputs).await.unwrap();

        assert_eq!(first.cache, Some(CacheOutcome::Miss));
        assert_eq!(second.cache, Some(CacheOutcome::Hit));
        assert_eq!(first.output, second.output);
        assert_eq!(step.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bypass_step_always_runs() {
        let exec = executor();
        let mut step = CountingStep::new("extraction");
        step.policy = CachePolicy::Bypass;

        for _ in 0..3 {
            let run = exec.execute(&step, &ctx("doc1"), &StepInputs::new()).await.unwrap();
            assert!(run.cache.is_none());
        }
        assert_eq!(step.runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_theme_version_partitions_cache() {
        let exec = executor();
        let mut step = CountingStep::new("theme");
        step.reads_theme = true;

        let v1 = ctx("doc1");
        let mut v2 = ctx("doc1");
        v2.theme = Arc::new(crate::context::ThemeSnapshot {
            version: 2,
            ..Default::default()
        });

        exec.execute(&step, &v1, &StepInputs::new()).await.unwrap();
        let run = exec.execute(&step, &v2, &StepInputs::new()).await.unwrap();
        assert_eq!(run.cache, Some(CacheOutcome::Miss));
        assert_eq!(step.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_same_version_different_coverage_misses() {
        let exec = executor();
        let mut step = CountingStep::new("theme");
        step.reads_theme = true;

        let snapshot = |keyword: &str| {
            Arc::new(crate::context::ThemeSnapshot {
                version: 1,
                coverage: [(keyword.to_string(), 1)].into_iter().collect(),
            })
        };
        let first = ctx("doc-b").with_theme(snapshot("t-a"));
        let second = ctx("doc-b").with_theme(snapshot("t-c"));

        let a = exec.execute(&step, &first, &StepInputs::new()).await.unwrap();
        let c = exec.execute(&step, &second, &StepInputs::new()).await.unwrap();
        assert_eq!(a.cache, Some(CacheOutcome::Miss));
        assert_eq!(c.cache, Some(CacheOutcome::Miss));
        assert_eq!(step.runs.load(Ordering::SeqCst), 2);

        let again = exec.execute(&step, &second, &StepInputs::new()).await.unwrap();
        assert_eq!(again.cache, Some(CacheOutcome::Hit));
    }

    #[test]
    fn test_key_ignores_theme_for_pure_steps() {
        let step = CountingStep::new("writer");
        let mut other = ctx("doc1");
        other.theme = Arc::new(crate::context::ThemeSnapshot {
            version: 9,
            ..Default::default()
        });
        assert_eq!(
            StepExecutor::cache_key(&step, &ctx("doc1"), &StepInputs::new()),
            StepExecutor::cache_key(&step, &other, &StepInputs::new())
        );
    }

    #[tokio::test]
    async fn test_failure_wrapped_as_step_error() {
        let exec = executor();
        let mut step = CountingStep::new("writer");
        step.fail = true;

        let err = exec
            .execute(&step, &ctx("doc2"), &StepInputs::new())
            .await
            .unwrap_err();
        assert_eq!(err.step_name, "writer");
        assert_eq!(err.document_id, "doc2");
        assert!(matches!(*err.cause, PressroomError::CacheCompute { .. }));
    }
}
