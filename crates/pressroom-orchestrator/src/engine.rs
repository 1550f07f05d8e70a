use crate::job::{DocumentJob, StepRecord};
use crate::ledger::ThemeLedger;
use crate::persistence::ReportSink;
use crate::pipeline::{Pipeline, StepDefinition};
use crate::report::RunReport;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use pressroom_agents::{StepContext, StepExecutor, StepInputs, StepOutput, THEME_STEP};
use pressroom_core::{DocumentRef, EngineConfig, ModelParams, PressroomError, PressroomResult};
use pressroom_metrics::MetricsRegistry;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const RUNNING_JOBS: &str = "orchestrator.running_jobs";

/// Result of [`Orchestrator::run`]: the report plus every admitted job with
/// its outputs and artifacts.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The finalized report.
    pub report: RunReport,
    /// Admitted jobs, in admission order.
    pub jobs: Vec<DocumentJob>,
}

/// Runs document jobs through the pipeline with bounded concurrency.
///
/// Jobs are admitted first come first served; each holds one semaphore
/// permit from admission until it is terminal. Steps of a job run in
/// declaration order.
pub struct Orchestrator {
    pipeline: Arc<Pipeline>,
    executor: Arc<StepExecutor>,
    params: ModelParams,
    max_concurrent_jobs: usize,
    metrics: Arc<MetricsRegistry>,
    report_sink: Option<Arc<dyn ReportSink>>,
}

/// State shared by the job tasks of one run.
#[derive(Clone)]
struct JobRuntime {
    pipeline: Arc<Pipeline>,
    executor: Arc<StepExecutor>,
    ledger: Arc<ThemeLedger>,
    metrics: Arc<MetricsRegistry>,
    cancel: CancellationToken,
    run_id: String,
    params: ModelParams,
}

/// Keeps the running-jobs gauge accurate on every exit path.
struct RunningGuard(Arc<MetricsRegistry>);

impl RunningGuard {
    fn enter(metrics: Arc<MetricsRegistry>) -> Self {
        metrics.add_gauge(RUNNING_JOBS, &[], 1.0);
        Self(metrics)
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.add_gauge(RUNNING_JOBS, &[], -1.0);
    }
}

impl Orchestrator {
    /// Create an orchestrator running at most `max_concurrent_jobs` jobs at once.
    pub fn new(
        pipeline: Pipeline,
        executor: Arc<StepExecutor>,
        params: ModelParams,
        max_concurrent_jobs: usize,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            executor,
            params,
            max_concurrent_jobs: max_concurrent_jobs.max(1),
            metrics,
            report_sink: None,
        }
    }

    /// Create an orchestrator with the concurrency limit from `config`.
    pub fn from_config(
        pipeline: Pipeline,
        executor: Arc<StepExecutor>,
        params: ModelParams,
        config: &EngineConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self::new(
            pipeline,
            executor,
            params,
            config.max_concurrent_jobs,
            metrics,
        )
    }

    /// Hand every finished run to `sink`.
    pub fn with_report_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.report_sink = Some(sink);
        self
    }

    /// The pipeline in use.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Concurrency limit.
    pub fn max_concurrent_jobs(&self) -> usize {
        self.max_concurrent_jobs
    }

    /// Process `documents` until all are terminal or `cancel` fires.
    ///
    /// Cancellation stops admission; running jobs finish their current step
    /// and skip the rest. Documents never admitted are listed as not started.
    /// Job failures never fail the run; only persistence errors do.
    pub async fn run(
        &self,
        documents: Vec<DocumentRef>,
        cancel: CancellationToken,
    ) -> PressroomResult<RunOutcome> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let runtime = JobRuntime {
            pipeline: Arc::clone(&self.pipeline),
            executor: Arc::clone(&self.executor),
            ledger: Arc::new(ThemeLedger::new()),
            metrics: Arc::clone(&self.metrics),
            cancel: cancel.clone(),
            run_id: run_id.clone(),
            params: self.params.clone(),
        };

        info!(
            run_id = %run_id,
            documents = documents.len(),
            max_concurrent_jobs = self.max_concurrent_jobs,
            steps = self.pipeline.len(),
            "Run started"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_jobs));
        let mut tasks: JoinSet<(usize, DocumentJob)> = JoinSet::new();
        let mut admitted: Vec<DocumentRef> = Vec::new();
        let mut not_admitted: Vec<DocumentRef> = Vec::new();
        let mut queue = documents.into_iter();

        while let Some(document) = queue.next() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(run_id = %run_id, admitted = admitted.len(), "Run cancelled, admission stopped");
                    not_admitted.push(document);
                    not_admitted.extend(queue.by_ref());
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => permit.map_err(|_| {
                    PressroomError::Orchestrator("job semaphore closed".into())
                })?,
            };

            let index = admitted.len();
            admitted.push(document.clone());
            self.metrics.increment("jobs.admitted", &[]);

            let runtime = runtime.clone();
            tasks.spawn(async move {
                let metrics = Arc::clone(&runtime.metrics);
                let fallback = document.clone();
                let job = AssertUnwindSafe(run_job(runtime, index, document, permit))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        let message = panic_message(panic.as_ref());
                        error!(document_id = %fallback.id, panic = %message, "Job panicked");
                        metrics.increment("jobs.completed", &[("status", "failed")]);
                        DocumentJob::aborted(fallback, format!("job panicked: {message}"))
                    });
                (index, job)
            });
        }

        let mut slots: Vec<Option<DocumentJob>> = vec![None; admitted.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, job)) => slots[index] = Some(job),
                Err(e) => error!(run_id = %run_id, error = %e, "Job task did not complete"),
            }
        }
        let jobs: Vec<DocumentJob> = slots
            .into_iter()
            .zip(admitted)
            .map(|(slot, document)| {
                slot.unwrap_or_else(|| DocumentJob::aborted(document, "job task aborted"))
            })
            .collect();

        if !not_admitted.is_empty() {
            self.metrics
                .increment_by("jobs.not_started", &[], not_admitted.len() as u64);
        }
        let not_started = not_admitted.into_iter().map(|d| d.id).collect();

        let report = self.build_report(run_id, started_at, &cancel, &runtime, &jobs, not_started);
        if let Some(sink) = &self.report_sink {
            sink.persist(&report, &jobs).await?;
        }
        Ok(RunOutcome { report, jobs })
    }

    fn build_report(
        &self,
        run_id: String,
        started_at: DateTime<Utc>,
        cancel: &CancellationToken,
        runtime: &JobRuntime,
        jobs: &[DocumentJob],
        not_started: Vec<String>,
    ) -> RunReport {
        let report = RunReport::build(
            run_id,
            started_at,
            cancel.is_cancelled(),
            jobs,
            not_started,
            self.executor.cache().stats(),
            runtime.ledger.snapshot().as_ref().clone(),
        );
        info!(
            run_id = %report.run_id,
            succeeded = report.succeeded,
            partial = report.partial,
            failed = report.failed,
            not_started = report.not_started.len(),
            cancelled = report.cancelled,
            "Run finished"
        );
        report
    }
}

/// Publishes a job's theme contribution exactly once, even when the job
/// panics, so later jobs never wait on it forever.
struct ThemeSlot {
    ledger: Arc<ThemeLedger>,
    index: usize,
    published: bool,
}

impl ThemeSlot {
    fn new(ledger: Arc<ThemeLedger>, index: usize) -> Self {
        Self {
            ledger,
            index,
            published: false,
        }
    }

    fn publish(&mut self, theme: Option<&StepOutput>) {
        if !self.published {
            self.ledger.publish(self.index, theme);
            self.published = true;
        }
    }
}

impl Drop for ThemeSlot {
    fn drop(&mut self) {
        self.publish(None);
    }
}

/// Why `def` cannot run, if anything prevents it.
fn skip_reason(
    def: &StepDefinition,
    job: &DocumentJob,
    abort_reason: Option<&str>,
    cancel: &CancellationToken,
) -> Option<String> {
    if let Some(reason) = abort_reason {
        return Some(reason.to_string());
    }
    if cancel.is_cancelled() {
        return Some("cancelled".to_string());
    }
    let missing: Vec<&str> = def
        .requires
        .iter()
        .map(String::as_str)
        .filter(|req| !job.outputs.contains_key(*req))
        .collect();
    if missing.is_empty() {
        None
    } else {
        Some(format!("missing input '{}'", missing.join("', '")))
    }
}

/// Run every step of one document, `index` being its admission position.
///
/// The permit is held until the job is terminal. The theme snapshot is
/// resolved right before the first step that reads it and covers exactly
/// the jobs admitted earlier; the job's own themes are published as soon as
/// its theme step is terminal.
async fn run_job(
    rt: JobRuntime,
    index: usize,
    document: DocumentRef,
    permit: OwnedSemaphorePermit,
) -> DocumentJob {
    let _permit = permit;
    let _running = RunningGuard::enter(Arc::clone(&rt.metrics));
    let mut theme_slot = ThemeSlot::new(Arc::clone(&rt.ledger), index);

    let mut job = DocumentJob::new(document.clone());
    job.start();
    let mut ctx = StepContext::new(rt.run_id.clone(), document, rt.params.clone());
    let mut theme_resolved = false;
    info!(document_id = %ctx.document.id, admission = index, "Job started");

    let mut abort_reason: Option<String> = None;
    for def in rt.pipeline.steps() {
        let name = def.name();
        if let Some(reason) = skip_reason(def, &job, abort_reason.as_deref(), &rt.cancel) {
            debug!(document_id = %ctx.document.id, step = name, reason = %reason, "Step skipped");
            job.record(StepRecord::skipped(name, reason));
        } else if def.step.reads_shared_state()
            && !theme_resolved
            && !resolve_theme(&rt, index, &mut ctx).await
        {
            job.record(StepRecord::skipped(name, "cancelled"));
        } else {
            theme_resolved |= def.step.reads_shared_state();
            let inputs = step_inputs(def, &job);
            let started = Instant::now();
            match rt.executor.execute(def.step.as_ref(), &ctx, &inputs).await {
                Ok(run) => {
                    job.complete_step(name, run.output, run.cache, run.elapsed.as_millis() as u64);
                }
                Err(err) => {
                    warn!(
                        document_id = %ctx.document.id,
                        step = name,
                        critical = def.critical,
                        error = %err,
                        "Step failed"
                    );
                    job.record(StepRecord::failed(&err, started.elapsed().as_millis() as u64));
                    if def.critical {
                        job.critical_failure = true;
                        abort_reason = Some(format!("critical step '{name}' failed"));
                    }
                }
            }
        }

        if name == THEME_STEP {
            theme_slot.publish(job.outputs.get(THEME_STEP));
        }
    }

    job.finish();
    theme_slot.publish(job.outputs.get(THEME_STEP));
    rt.metrics
        .increment("jobs.completed", &[("status", job.status.as_str())]);
    info!(
        document_id = %job.id(),
        status = %job.status,
        artifacts = job.artifacts.len(),
        "Job finished"
    );
    job
}

/// Attach the snapshot covering every job admitted before `index`.
/// Returns `false` when the run is cancelled while waiting.
async fn resolve_theme(rt: &JobRuntime, index: usize, ctx: &mut StepContext) -> bool {
    let snapshot = tokio::select! {
        biased;
        _ = rt.cancel.cancelled() => return false,
        snapshot = rt.ledger.snapshot_before(index) => snapshot,
    };
    debug!(
        document_id = %ctx.document.id,
        theme_version = snapshot.version,
        "Theme snapshot resolved"
    );
    ctx.theme = snapshot;
    true
}

fn step_inputs(def: &StepDefinition, job: &DocumentJob) -> StepInputs {
    let mut inputs = StepInputs::new();
    for req in &def.requires {
        if let Some(output) = job.outputs.get(req) {
            inputs.insert(req.clone(), output.clone());
        }
    }
    inputs
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
