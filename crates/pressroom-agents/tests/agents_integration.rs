//! Integration tests for pressroom-agents: model-backed steps behind the cache.

use async_trait::async_trait;
use pressroom_agents::{
    ExtractionStep, ModelStep, PipelineStep, PlainTextExtractor, StepContext, StepExecutor,
    StepInputs, StrategyTemplate, ThemeSnapshot, ThemeTemplate, WriterTemplate, EXTRACTION_STEP,
    STRATEGY_STEP, THEME_STEP, WRITER_STEP,
};
use pressroom_cache::{CacheOutcome, ResultCache};
use pressroom_core::{ApiError, DocumentRef, ModelParams, PressroomError};
use pressroom_gateway::{Completion, CompletionBackend, ModelGateway, PromptPayload, RetryPolicy};
use pressroom_metrics::MetricsRegistry;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Answers each prompt by recognising which template rendered it.
struct ScriptedBackend {
    calls: AtomicU32,
    fail_writer: bool,
}

impl ScriptedBackend {
    fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail_writer: false,
        }
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        prompt: &PromptPayload,
        _params: &ModelParams,
    ) -> Result<Completion, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let user = prompt.user.as_str();
        let content = if user.starts_with("Identify the themes") {
            r#"{"main_theme": "Five elements", "keywords": ["wood", "fire"]}"#.to_string()
        } else if user.starts_with("Design a content strategy") {
            "Sure!\n```json\n{\"title\": \"The five elements\", \"key_points\": [\"cycles\"]}\n```"
                .to_string()
        } else if user.starts_with("Write a blog article") {
            if self.fail_writer {
                return Err(ApiError::from_status(401, "invalid api key"));
            }
            "# The five elements\n\nWood feeds fire.".to_string()
        } else {
            return Err(ApiError::fatal(Some(400), "unexpected prompt"));
        };
        Ok(Completion {
            content,
            usage: None,
            status: 200,
        })
    }
}

struct Fixture {
    executor: StepExecutor,
    backend: Arc<ScriptedBackend>,
    steps: Vec<Box<dyn PipelineStep>>,
    _dir: tempfile::TempDir,
    document: DocumentRef,
}

fn fixture(backend: ScriptedBackend) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("elements.txt");
    std::fs::write(&path, "Wood, fire, earth, metal and water.").unwrap();

    let metrics = Arc::new(MetricsRegistry::new());
    let backend = Arc::new(backend);
    let gateway = Arc::new(ModelGateway::new(
        backend.clone(),
        RetryPolicy::none(),
        Duration::from_secs(5),
        metrics.clone(),
    ));
    let cache = Arc::new(ResultCache::new(100, metrics.clone()));

    let steps: Vec<Box<dyn PipelineStep>> = vec![
        Box::new(ExtractionStep::new(Arc::new(PlainTextExtractor::default()))),
        Box::new(ModelStep::new(THEME_STEP, Arc::new(ThemeTemplate), gateway.clone()).with_theme()),
        Box::new(ModelStep::new(STRATEGY_STEP, Arc::new(StrategyTemplate), gateway.clone())),
        Box::new(ModelStep::new(WRITER_STEP, Arc::new(WriterTemplate::default()), gateway)),
    ];

    Fixture {
        executor: StepExecutor::new(cache, Duration::from_secs(3600), metrics),
        backend,
        steps,
        _dir: dir,
        document: DocumentRef::from_path(&path),
    }
}

/// Runs the steps in order, each seeing every earlier output.
async fn run_chain(
    fx: &Fixture,
    ctx: &StepContext,
) -> Result<Vec<(String, Option<CacheOutcome>, serde_json::Value)>, pressroom_core::StepError> {
    let mut inputs = StepInputs::new();
    let mut runs = Vec::new();
    for step in &fx.steps {
        let run = fx.executor.execute(step.as_ref(), ctx, &inputs).await?;
        runs.push((step.name().to_string(), run.cache, run.output.data.clone()));
        inputs.insert(step.name(), run.output);
    }
    Ok(runs)
}

// --- Chain ---

#[tokio::test]
async fn test_chain_produces_article() {
    let fx = fixture(ScriptedBackend::new());
    let ctx = StepContext::new("run-1", fx.document.clone(), ModelParams::new("m1"));

    let runs = run_chain(&fx, &ctx).await.unwrap();
    let names: Vec<&str> = runs.iter().map(|(n, _, _)| n.as_str()).collect();
    assert_eq!(names, vec![EXTRACTION_STEP, THEME_STEP, STRATEGY_STEP, WRITER_STEP]);

    assert_eq!(runs[0].1, None);
    assert_eq!(runs[1].2["main_theme"], "Five elements");
    assert_eq!(runs[2].2["title"], "The five elements");
    assert_eq!(runs[3].2["title"], "The five elements");
    assert_eq!(fx.backend.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_rerun_is_served_from_cache() {
    let fx = fixture(ScriptedBackend::new());
    let ctx = StepContext::new("run-1", fx.document.clone(), ModelParams::new("m1"));

    let first = run_chain(&fx, &ctx).await.unwrap();
    let second = run_chain(&fx, &ctx).await.unwrap();

    assert_eq!(fx.backend.calls.load(Ordering::SeqCst), 3);
    for ((_, _, a), (_, outcome, b)) in first.iter().zip(&second) {
        assert_eq!(a, b);
        assert!(outcome.map_or(true, |o| o == CacheOutcome::Hit));
    }
}

#[tokio::test]
async fn test_theme_version_bump_reruns_theme_step() {
    let fx = fixture(ScriptedBackend::new());
    let ctx = StepContext::new("run-1", fx.document.clone(), ModelParams::new("m1"));
    run_chain(&fx, &ctx).await.unwrap();

    let newer = ctx.clone().with_theme(Arc::new(ThemeSnapshot {
        version: 1,
        ..ThemeSnapshot::default()
    }));
    let runs = run_chain(&fx, &newer).await.unwrap();

    // The theme step reran; its output is unchanged so strategy and writer hit.
    assert_eq!(fx.backend.calls.load(Ordering::SeqCst), 4);
    assert_eq!(runs[1].1, Some(CacheOutcome::Miss));
    assert_eq!(runs[2].1, Some(CacheOutcome::Hit));
    assert_eq!(runs[3].1, Some(CacheOutcome::Hit));
}

// --- Failures ---

#[tokio::test]
async fn test_fatal_api_error_becomes_step_error() {
    let fx = fixture(ScriptedBackend {
        fail_writer: true,
        ..ScriptedBackend::new()
    });
    let ctx = StepContext::new("run-1", fx.document.clone(), ModelParams::new("m1"));

    let err = run_chain(&fx, &ctx).await.unwrap_err();
    assert_eq!(err.step_name, WRITER_STEP);
    assert_eq!(err.document_id, "elements");

    let PressroomError::CacheCompute { source, .. } = err.cause.as_ref() else {
        panic!("expected a cache compute failure, got {:?}", err.cause);
    };
    let api = source.api_error().unwrap();
    assert!(api.is_auth_failure());
    assert_eq!(fx.backend.calls.load(Ordering::SeqCst), 3);

    // Failures are never cached.
    run_chain(&fx, &ctx).await.unwrap_err();
    assert_eq!(fx.backend.calls.load(Ordering::SeqCst), 4);
}
