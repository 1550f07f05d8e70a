//! Document job orchestration for Pressroom.
//!
//! Runs every input document through the content [`Pipeline`] with a global
//! concurrency limit, tracks each job's state machine
//! (`pending → running → succeeded | partial | failed`), folds theme
//! coverage across documents, and assembles the [`RunReport`] handed to the
//! persistence collaborator.
//!
//! # Main types
//!
//! - [`Orchestrator`]: Admits jobs FCFS under a semaphore and drives their steps.
//! - [`Pipeline`]: Ordered steps with declared requirements and criticality.
//! - [`DocumentJob`] / [`JobStatus`] / [`StepRecord`]: Per-document execution record.
//! - [`ThemeLedger`]: Versioned theme coverage shared across jobs.
//! - [`RunReport`]: Counts, failures with cause chains, content totals, next steps.
//! - [`ReportSink`] / [`JsonReportStore`]: Report and artifact persistence.
//! - [`DocumentSource`] / [`DirectoryScanner`]: Input discovery.

/// The orchestration engine.
pub mod engine;
/// Job records and status classification.
pub mod job;
/// Cross-document theme coverage.
pub mod ledger;
/// JSON persistence for reports and artifacts.
pub mod persistence;
/// Pipeline definition and the standard content pipeline.
pub mod pipeline;
/// The run report.
pub mod report;
/// Input document discovery.
pub mod source;

pub use engine::{Orchestrator, RunOutcome};
pub use job::{DocumentJob, JobStatus, StepOutcome, StepRecord};
pub use ledger::ThemeLedger;
pub use persistence::{JsonReportStore, PersistedRun, ReportSink};
pub use pipeline::{standard_pipeline, Pipeline, PipelineBuilder, StepDefinition};
pub use report::{ContentCounts, JobFailure, JobSummary, RunReport, StepFailure};
pub use source::{DirectoryScanner, DocumentSource};
