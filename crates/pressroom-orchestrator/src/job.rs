use chrono::{DateTime, Utc};
use pressroom_agents::StepOutput;
use pressroom_cache::CacheOutcome;
use pressroom_core::{cause_chain, ApiErrorKind, Artifact, DocumentRef, StepError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle of a document job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a concurrency slot.
    Pending,
    /// Steps are executing.
    Running,
    /// Every step completed.
    Succeeded,
    /// Some steps completed, some failed or were skipped.
    Partial,
    /// A critical step failed or nothing completed.
    Failed,
}

impl JobStatus {
    /// Lowercase name, as used in metric tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Partial => "partial",
            JobStatus::Failed => "failed",
        }
    }

    /// True for succeeded, partial and failed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Partial | JobStatus::Failed
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one step of a job ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    /// The step produced output.
    Completed {
        /// How the cache served it; absent for bypassed steps.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache: Option<CacheOutcome>,
    },
    /// The step ran and failed.
    Failed {
        /// Outermost error first.
        cause_chain: Vec<String>,
        /// Classification of the model API failure, if that was the cause.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_kind: Option<ApiErrorKind>,
        /// HTTP status of the model API failure, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_status: Option<u16>,
    },
    /// The step did not run.
    Skipped {
        /// Why it did not run.
        reason: String,
    },
}

/// Record of one step within a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step name.
    pub step: String,
    /// Outcome.
    #[serde(flatten)]
    pub outcome: StepOutcome,
    /// Time spent, 0 for skipped steps.
    pub elapsed_ms: u64,
}

impl StepRecord {
    /// A completed step.
    pub fn completed(step: &str, cache: Option<CacheOutcome>, elapsed_ms: u64) -> Self {
        Self {
            step: step.to_string(),
            outcome: StepOutcome::Completed { cache },
            elapsed_ms,
        }
    }

    /// A failed step, keeping the full cause chain of `error`.
    pub fn failed(error: &StepError, elapsed_ms: u64) -> Self {
        let api = error.cause.api_error();
        Self {
            step: error.step_name.clone(),
            outcome: StepOutcome::Failed {
                cause_chain: cause_chain(error),
                api_kind: api.map(|e| e.kind),
                api_status: api.and_then(|e| e.status),
            },
            elapsed_ms,
        }
    }

    /// A step that did not run.
    pub fn skipped(step: &str, reason: impl Into<String>) -> Self {
        Self {
            step: step.to_string(),
            outcome: StepOutcome::Skipped {
                reason: reason.into(),
            },
            elapsed_ms: 0,
        }
    }

    /// True when the step completed.
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, StepOutcome::Completed { .. })
    }

    /// True when the step ran and failed.
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, StepOutcome::Failed { .. })
    }
}

/// One document's journey through the pipeline.
#[derive(Debug, Clone)]
pub struct DocumentJob {
    /// The document.
    pub document: DocumentRef,
    /// Current status.
    pub status: JobStatus,
    /// Step records in pipeline order.
    pub steps: Vec<StepRecord>,
    /// Outputs of completed steps, kept even when the job fails.
    pub outputs: BTreeMap<String, StepOutput>,
    /// Artifacts of completed steps, in production order.
    pub artifacts: Vec<Artifact>,
    /// Set when a critical step failed.
    pub critical_failure: bool,
    /// Admission time.
    pub started_at: Option<DateTime<Utc>>,
    /// Completion time.
    pub finished_at: Option<DateTime<Utc>>,
}

impl DocumentJob {
    /// A pending job.
    pub fn new(document: DocumentRef) -> Self {
        Self {
            document,
            status: JobStatus::Pending,
            steps: Vec::new(),
            outputs: BTreeMap::new(),
            artifacts: Vec::new(),
            critical_failure: false,
            started_at: None,
            finished_at: None,
        }
    }

    /// Document id.
    pub fn id(&self) -> &str {
        &self.document.id
    }

    /// Move to running.
    pub fn start(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Record a completed step and keep its output.
    pub fn complete_step(
        &mut self,
        step: &str,
        output: StepOutput,
        cache: Option<CacheOutcome>,
        elapsed_ms: u64,
    ) {
        self.steps
            .push(StepRecord::completed(step, cache, elapsed_ms));
        self.artifacts.extend(output.artifacts.iter().cloned());
        self.outputs.insert(step.to_string(), output);
    }

    /// Record a step record that is not a completion.
    pub fn record(&mut self, record: StepRecord) {
        self.steps.push(record);
    }

    /// Step record by name.
    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|r| r.step == name)
    }

    /// Classify the job and stamp the finish time.
    pub fn finish(&mut self) {
        let completed = self.steps.iter().filter(|r| r.is_completed()).count();
        self.status = if self.critical_failure || completed == 0 {
            JobStatus::Failed
        } else if completed == self.steps.len() {
            JobStatus::Succeeded
        } else {
            JobStatus::Partial
        };
        self.finished_at = Some(Utc::now());
    }

    /// A job whose task ended abnormally.
    pub fn aborted(document: DocumentRef, reason: impl Into<String>) -> Self {
        let mut job = Self::new(document);
        job.started_at = Some(Utc::now());
        job.record(StepRecord::skipped("job", reason));
        job.critical_failure = true;
        job.finish();
        job
    }
}
