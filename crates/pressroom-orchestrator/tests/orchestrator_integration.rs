//! End-to-end tests: the standard pipeline against a scripted model backend.

use async_trait::async_trait;
use pressroom_agents::{DocumentExtractor, StepExecutor};
use pressroom_cache::ResultCache;
use pressroom_core::{ApiError, ModelParams};
use pressroom_gateway::{Completion, CompletionBackend, ModelGateway, PromptPayload, RetryPolicy};
use pressroom_metrics::MetricsRegistry;
use pressroom_orchestrator::{
    standard_pipeline, DirectoryScanner, DocumentSource, JobStatus, JsonReportStore, Orchestrator,
    StepOutcome,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Replies to each standard template; fails the writer for one document.
struct ScriptedBackend {
    calls: AtomicU32,
    reject_writer_for: Option<&'static str>,
    theme_delays: Vec<(&'static str, Duration)>,
}

impl ScriptedBackend {
    fn new(reject_writer_for: Option<&'static str>) -> Self {
        Self {
            calls: AtomicU32::new(0),
            reject_writer_for,
            theme_delays: Vec::new(),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// The document id quoted in prompts as `document "<id>"`.
fn quoted_document(prompt: &str) -> &str {
    prompt
        .split("document \"")
        .nth(1)
        .and_then(|rest| rest.split('"').next())
        .unwrap_or("unknown")
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
            let doc = quoted_document(user);
            if let Some((_, delay)) = self.theme_delays.iter().find(|(d, _)| *d == doc) {
                tokio::time::sleep(*delay).await;
            }
            format!(
                r#"{{"main_theme": "Theme of {doc}", "keywords": ["qi", "{doc}"]}}"#,
                doc = quoted_document(user)
            )
        } else if user.starts_with("Design a content strategy") {
            format!(
                r#"{{"title": "Article on {doc}", "target_audience": "beginners", "key_points": ["origins", "practice"], "topics": ["follow-up"]}}"#,
                doc = quoted_document(user)
            )
        } else if user.starts_with("Write a blog article") {
            if let Some(doc) = self.reject_writer_for {
                if user.contains(&format!("Title: Article on {doc}\n")) {
                    return Err(ApiError::from_status(401, "invalid api key"));
                }
            }
            "# Article\n\n## Origins\nBody text.".to_string()
        } else if user.starts_with("Write three social network posts") {
            r#"{"posts": [{"platform": "facebook", "text": "a"}, {"platform": "linkedin", "text": "b"}]}"#
                .to_string()
        } else if user.starts_with("Propose two illustrations") {
            r#"{"visuals": [{"title": "v", "prompt": "ink painting"}]}"#.to_string()
        } else if user.starts_with("Review the article") {
            r#"{"approved": true, "score": 88, "issues": [], "suggestions": ["add sources"]}"#
                .to_string()
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

struct Harness {
    orchestrator: Orchestrator,
    backend: Arc<ScriptedBackend>,
    metrics: Arc<MetricsRegistry>,
}

fn harness(backend: ScriptedBackend, max_jobs: usize) -> Harness {
    let metrics = Arc::new(MetricsRegistry::new());
    let backend = Arc::new(backend);
    let gateway = Arc::new(ModelGateway::new(
        backend.clone(),
        RetryPolicy::none(),
        Duration::from_secs(5),
        metrics.clone(),
    ));
    let pipeline = standard_pipeline(gateway, Arc::new(DocumentExtractor::default())).unwrap();
    let cache = Arc::new(ResultCache::new(1000, metrics.clone()));
    let executor = Arc::new(StepExecutor::new(
        cache,
        Duration::from_secs(3600),
        metrics.clone(),
    ));
    let orchestrator = Orchestrator::new(
        pipeline,
        executor,
        ModelParams::new("qwen/qwen3-coder"),
        max_jobs,
        metrics.clone(),
    );
    Harness {
        orchestrator,
        backend,
        metrics,
    }
}

fn input_dir(names: &[&str]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in names {
        std::fs::write(
            dir.path().join(format!("{name}.txt")),
            format!("Notes about {name}: the flow of qi through the meridians."),
        )
        .unwrap();
    }
    dir
}

/// A one-page PDF whose text layer reads `text`.
fn one_page_pdf(text: &str) -> Vec<u8> {
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.4");
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let content = format!("BT /F1 12 Tf 100 700 Td ({text}) Tj ET");
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        "Resources" => resources_id,
        "Contents" => content_id,
    });
    let pages_id = doc.add_object(dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
    });
    if let Ok(Object::Dictionary(dict)) = doc.get_object_mut(page_id) {
        dict.set("Parent", pages_id);
    }
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}

// --- Scenarios ---

#[tokio::test]
async fn test_writer_failure_leaves_visual_intact() {
    let input = input_dir(&["doc1", "doc2", "doc3"]);
    let h = harness(ScriptedBackend::new(Some("doc2")), 2);
    let docs = DirectoryScanner::new(input.path()).documents().await.unwrap();

    let outcome = h
        .orchestrator
        .run(docs, CancellationToken::new())
        .await
        .unwrap();

    let statuses: Vec<(&str, JobStatus)> = outcome
        .jobs
        .iter()
        .map(|j| (j.id(), j.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("doc1", JobStatus::Succeeded),
            ("doc2", JobStatus::Partial),
            ("doc3", JobStatus::Succeeded),
        ]
    );

    let doc2 = &outcome.jobs[1];
    assert!(doc2.step("writer").unwrap().is_failed());
    assert!(doc2.step("visual").unwrap().is_completed());
    assert!(matches!(
        doc2.step("social").unwrap().outcome,
        StepOutcome::Skipped { .. }
    ));
    assert!(matches!(
        doc2.step("validator").unwrap().outcome,
        StepOutcome::Skipped { .. }
    ));

    let report = &outcome.report;
    assert!(report.has_failures());
    assert_eq!(report.content.articles, 2);
    assert_eq!(report.content.social_posts, 4);
    assert_eq!(report.content.visual_prompts, 3);
    assert!(report.failures[0].errors[0]
        .cause_chain
        .iter()
        .any(|c| c.contains("HTTP 401")));
    assert!(report.next_steps.iter().any(|s| s.contains("API key")));

    // 6 model steps for each full job, 4 calls for doc2 (theme, strategy, writer, visual).
    assert_eq!(h.backend.calls(), 16);
    assert_eq!(h.metrics.counter_total("gateway.calls"), 16);
}

#[tokio::test]
async fn test_rerun_is_idempotent_and_free() {
    let input = input_dir(&["alpha", "beta"]);
    let h = harness(ScriptedBackend::new(None), 1);
    let docs = DirectoryScanner::new(input.path()).documents().await.unwrap();

    let first = h
        .orchestrator
        .run(docs.clone(), CancellationToken::new())
        .await
        .unwrap();
    let calls_after_first = h.backend.calls();
    assert_eq!(calls_after_first, 12);

    let second = h
        .orchestrator
        .run(docs, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(h.backend.calls(), calls_after_first);

    for (a, b) in first.jobs.iter().zip(&second.jobs) {
        assert_eq!(a.status, JobStatus::Succeeded);
        assert_eq!(
            serde_json::to_string(&a.outputs).unwrap(),
            serde_json::to_string(&b.outputs).unwrap()
        );
    }
    assert!(second.report.cache.hits >= 12);
}

#[tokio::test]
async fn test_concurrent_rerun_is_idempotent_and_free() {
    let names = ["d1", "d2", "d3", "d4", "d5"];
    let input = input_dir(&names);
    // Theme replies arrive in reverse admission order.
    let backend = ScriptedBackend {
        theme_delays: names
            .iter()
            .zip([120, 90, 60, 30, 0])
            .map(|(name, ms)| (*name, Duration::from_millis(ms)))
            .collect(),
        ..ScriptedBackend::new(None)
    };
    let h = harness(backend, 3);
    let docs = DirectoryScanner::new(input.path()).documents().await.unwrap();

    let first = h
        .orchestrator
        .run(docs.clone(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.report.succeeded, 5);
    assert_eq!(h.backend.calls(), 30);

    let second = h
        .orchestrator
        .run(docs, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(h.backend.calls(), 30);
    assert_eq!(second.report.themes, first.report.themes);
    for (a, b) in first.jobs.iter().zip(&second.jobs) {
        assert_eq!(
            serde_json::to_string(&a.outputs).unwrap(),
            serde_json::to_string(&b.outputs).unwrap()
        );
    }
}

#[tokio::test]
async fn test_pdf_documents_are_extracted() {
    let input = input_dir(&["notes"]);
    std::fs::write(input.path().join("book.pdf"), one_page_pdf("Meridians")).unwrap();
    let h = harness(ScriptedBackend::new(None), 2);
    let docs = DirectoryScanner::new(input.path()).documents().await.unwrap();

    let outcome = h
        .orchestrator
        .run(docs, CancellationToken::new())
        .await
        .unwrap();

    let book = outcome.jobs.iter().find(|j| j.id() == "book").unwrap();
    assert_eq!(book.status, JobStatus::Succeeded);
    let text = book.outputs["extraction"].str_field("text").unwrap();
    assert!(text.contains("Meridians"), "got: {text}");
    assert_eq!(outcome.report.succeeded, 2);
}

#[tokio::test]
async fn test_run_persists_report_and_content() {
    let input = input_dir(&["gamma"]);
    let output = tempfile::tempdir().unwrap();
    let h = harness(ScriptedBackend::new(None), 3);
    let store = Arc::new(JsonReportStore::new(output.path()));
    let orchestrator = h.orchestrator.with_report_sink(store.clone());
    let docs = DirectoryScanner::new(input.path()).documents().await.unwrap();

    let outcome = orchestrator
        .run(docs, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.report.succeeded, 1);

    let content = output.path().join("content/gamma");
    for file in [
        "themes.json",
        "strategy.json",
        "article.md",
        "social_posts.json",
        "visual_prompts.json",
        "validation.json",
    ] {
        assert!(content.join(file).exists(), "missing {file}");
    }
    let article = std::fs::read_to_string(content.join("article.md")).unwrap();
    assert!(article.starts_with("# Article"));

    let latest = store.load_latest().await.unwrap().unwrap();
    assert_eq!(latest.run_id, outcome.report.run_id);
    assert_eq!(store.list_reports().await.unwrap().len(), 1);
}
