use crate::job::{DocumentJob, JobStatus, StepOutcome, StepRecord};
use chrono::{DateTime, Utc};
use pressroom_agents::{ThemeSnapshot, SOCIAL_STEP, VALIDATOR_STEP, VISUAL_STEP, WRITER_STEP};
use pressroom_cache::CacheStats;
use pressroom_core::ApiErrorKind;
use serde::{Deserialize, Serialize};

/// Per-job entry of the run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    /// Document id.
    pub document_id: String,
    /// Source path.
    pub source: String,
    /// Terminal status.
    pub status: JobStatus,
    /// Step records in pipeline order.
    pub steps: Vec<StepRecord>,
    /// File names of the artifacts produced.
    pub artifacts: Vec<String>,
    /// Wall-clock duration of the job.
    pub duration_ms: u64,
}

/// One failed step of a failed or partial job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    /// Step name.
    pub step: String,
    /// Outermost error first.
    pub cause_chain: Vec<String>,
}

/// A job that did not fully succeed, with every step failure behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Document id.
    pub document_id: String,
    /// Failed or partial.
    pub status: JobStatus,
    /// Failures in pipeline order; empty when the job only had skipped steps.
    pub errors: Vec<StepFailure>,
}

/// Content produced during the run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentCounts {
    /// Articles written.
    pub articles: usize,
    /// Social network posts.
    pub social_posts: usize,
    /// Image generation prompts.
    pub visual_prompts: usize,
    /// Articles the validator rejected.
    pub rejected_articles: usize,
}

/// Final record of a run, handed to the [`ReportSink`](crate::ReportSink).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identifier.
    pub run_id: String,
    /// Start of the run.
    pub started_at: DateTime<Utc>,
    /// End of the run.
    pub finished_at: DateTime<Utc>,
    /// Whether the run was cancelled before every document was admitted or finished.
    pub cancelled: bool,
    /// Documents submitted.
    pub total_documents: usize,
    /// Jobs that succeeded.
    pub succeeded: usize,
    /// Jobs that partially succeeded.
    pub partial: usize,
    /// Jobs that failed.
    pub failed: usize,
    /// Ids of documents never admitted.
    pub not_started: Vec<String>,
    /// Admitted jobs, in admission order.
    pub jobs: Vec<JobSummary>,
    /// Failed and partial jobs with their cause chains.
    pub failures: Vec<JobFailure>,
    /// Content produced.
    pub content: ContentCounts,
    /// Cache state at the end of the run.
    pub cache: CacheStats,
    /// Theme coverage at the end of the run.
    pub themes: ThemeSnapshot,
    /// Suggested follow-up actions.
    pub next_steps: Vec<String>,
}

impl RunReport {
    /// Assemble the report from terminal jobs.
    pub fn build(
        run_id: String,
        started_at: DateTime<Utc>,
        cancelled: bool,
        jobs: &[DocumentJob],
        not_started: Vec<String>,
        cache: CacheStats,
        themes: ThemeSnapshot,
    ) -> Self {
        let count = |status: JobStatus| jobs.iter().filter(|j| j.status == status).count();

        let summaries = jobs.iter().map(summarize).collect();
        let failures: Vec<JobFailure> = jobs
            .iter()
            .filter(|j| matches!(j.status, JobStatus::Failed | JobStatus::Partial))
            .map(|j| JobFailure {
                document_id: j.id().to_string(),
                status: j.status,
                errors: j
                    .steps
                    .iter()
                    .filter_map(|r| match &r.outcome {
                        StepOutcome::Failed { cause_chain, .. } => Some(StepFailure {
                            step: r.step.clone(),
                            cause_chain: cause_chain.clone(),
                        }),
                        _ => None,
                    })
                    .collect(),
            })
            .collect();

        let mut report = Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            cancelled,
            total_documents: jobs.len() + not_started.len(),
            succeeded: count(JobStatus::Succeeded),
            partial: count(JobStatus::Partial),
            failed: count(JobStatus::Failed),
            not_started,
            jobs: summaries,
            failures,
            content: count_content(jobs),
            cache,
            themes,
            next_steps: Vec::new(),
        };
        report.next_steps = next_steps(&report, jobs);
        report
    }

    /// True when any job failed or only partially succeeded.
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.partial > 0
    }

    /// Run duration in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// Human-readable summary of the run.
    pub fn to_markdown(&self) -> String {
        let mut md = format!("# Pressroom run {}\n\n", self.run_id);
        md.push_str(&format!(
            "Started {} and finished {} ({} ms){}.\n\n",
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.finished_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.duration_ms(),
            if self.cancelled { ", cancelled" } else { "" }
        ));

        md.push_str("## Documents\n\n| Status | Count |\n|---|---|\n");
        md.push_str(&format!("| succeeded | {} |\n", self.succeeded));
        md.push_str(&format!("| partial | {} |\n", self.partial));
        md.push_str(&format!("| failed | {} |\n", self.failed));
        md.push_str(&format!("| not started | {} |\n\n", self.not_started.len()));

        md.push_str("## Content produced\n\n");
        md.push_str(&format!("- Articles: {}\n", self.content.articles));
        md.push_str(&format!("- Social posts: {}\n", self.content.social_posts));
        md.push_str(&format!("- Visual prompts: {}\n", self.content.visual_prompts));
        md.push_str(&format!(
            "- Rejected by review: {}\n\n",
            self.content.rejected_articles
        ));

        md.push_str("## Cache\n\n");
        md.push_str(&format!(
            "{} entries, {} hits, {} coalesced, {} misses, {} errors (hit rate {:.0}%)\n\n",
            self.cache.entries,
            self.cache.hits,
            self.cache.coalesced_hits,
            self.cache.misses,
            self.cache.errors,
            self.cache.hit_rate() * 100.0
        ));

        let top = self.themes.top_themes(5);
        if !top.is_empty() {
            md.push_str("## Top themes\n\n");
            for (theme, docs) in top {
                md.push_str(&format!("- {theme} ({docs})\n"));
            }
            md.push('\n');
        }

        if !self.failures.is_empty() {
            md.push_str("## Failures\n\n");
            for failure in &self.failures {
                md.push_str(&format!("### {} ({})\n\n", failure.document_id, failure.status));
                for error in &failure.errors {
                    md.push_str(&format!(
                        "- `{}`: {}\n",
                        error.step,
                        error.cause_chain.join(" <- ")
                    ));
                }
                md.push('\n');
            }
        }

        md.push_str("## Next steps\n\n");
        for step in &self.next_steps {
            md.push_str(&format!("- {step}\n"));
        }
        md
    }
}

fn summarize(job: &DocumentJob) -> JobSummary {
    let duration_ms = match (job.started_at, job.finished_at) {
        (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as u64,
        _ => 0,
    };
    JobSummary {
        document_id: job.id().to_string(),
        source: job.document.source.display().to_string(),
        status: job.status,
        steps: job.steps.clone(),
        artifacts: job
            .artifacts
            .iter()
            .map(pressroom_core::Artifact::resolved_file_name)
            .collect(),
        duration_ms,
    }
}

fn count_content(jobs: &[DocumentJob]) -> ContentCounts {
    let mut counts = ContentCounts::default();
    for job in jobs {
        if job.outputs.contains_key(WRITER_STEP) {
            counts.articles += 1;
        }
        if let Some(social) = job.outputs.get(SOCIAL_STEP) {
            counts.social_posts += social.array_len("posts");
        }
        if let Some(visual) = job.outputs.get(VISUAL_STEP) {
            counts.visual_prompts += visual.array_len("visuals");
        }
        if rejected(job) {
            counts.rejected_articles += 1;
        }
    }
    counts
}

fn rejected(job: &DocumentJob) -> bool {
    job.outputs
        .get(VALIDATOR_STEP)
        .and_then(|v| v.data.get("approved"))
        .and_then(serde_json::Value::as_bool)
        == Some(false)
}

fn next_steps(report: &RunReport, jobs: &[DocumentJob]) -> Vec<String> {
    let mut steps = Vec::new();
    let failed_api = || {
        jobs.iter()
            .flat_map(|j| &j.steps)
            .filter_map(|r| match &r.outcome {
                StepOutcome::Failed {
                    api_kind,
                    api_status,
                    ..
                } => Some((*api_kind, *api_status)),
                _ => None,
            })
    };

    if failed_api().any(|(_, status)| matches!(status, Some(401) | Some(403))) {
        steps.push(
            "Check the API key (OPENROUTER_API_KEY): the model endpoint rejected the credentials."
                .to_string(),
        );
    }
    if failed_api()
        .any(|(kind, status)| kind == Some(ApiErrorKind::ExhaustedRetries) && status == Some(429))
    {
        steps.push(
            "Rate limits outlasted every retry: lower max_concurrent_jobs or raise retry_max_delay_ms."
                .to_string(),
        );
    }

    let retry = report.failed + report.partial;
    if retry > 0 {
        steps.push(format!(
            "Re-run the {retry} failed or partial document(s); completed steps are served from the cache."
        ));
    }
    if !report.not_started.is_empty() {
        steps.push(format!(
            "{} document(s) were not started because the run was cancelled: {}.",
            report.not_started.len(),
            report.not_started.join(", ")
        ));
    }

    let rejected: Vec<&str> = jobs.iter().filter(|j| rejected(j)).map(DocumentJob::id).collect();
    if !rejected.is_empty() {
        steps.push(format!(
            "Review the article(s) rejected by validation: {}.",
            rejected.join(", ")
        ));
    }

    if steps.is_empty() {
        steps.push("All documents processed; the content is ready for publication.".to_string());
    }
    steps
}
