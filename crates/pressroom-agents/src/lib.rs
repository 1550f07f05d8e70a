//! Pipeline steps for Pressroom.
//!
//! A document job is a sequence of [`PipelineStep`]s. The first extracts the
//! source text; the rest are [`ModelStep`]s pairing a [`PromptTemplate`] with
//! the shared [`ModelGateway`](pressroom_gateway::ModelGateway). Every step
//! runs through a [`StepExecutor`], which serves cacheable steps from the
//! result cache and records step timings.
//!
//! # Main types
//!
//! - [`PipelineStep`]: The step trait the orchestrator drives.
//! - [`StepExecutor`]: Runs a step behind the cache and wraps its failures.
//! - [`StepContext`] / [`StepInputs`] / [`StepOutput`]: What a step sees and produces.
//! - [`ThemeSnapshot`]: Versioned theme coverage shared across documents.
//! - [`ExtractionStep`] / [`Extractor`]: Source text extraction.
//! - [`DocumentExtractor`]: Routes PDFs to [`PdfExtractor`] and text files to [`PlainTextExtractor`].
//! - [`ModelStep`] / [`PromptTemplate`]: Model-backed steps and their prompts.

/// Job context, step inputs and outputs.
pub mod context;
/// Cached step execution.
pub mod executor;
/// Source text extraction.
pub mod extract;
/// Model-backed steps.
pub mod model_step;
/// PDF text extraction.
pub mod pdf;
/// The step trait and cache policy.
pub mod step;
/// Prompt template trait and reply parsing helpers.
pub mod template;
/// Templates of the standard pipeline.
pub mod templates;

pub use context::{StepContext, StepInputs, StepOutput, ThemeSnapshot};
pub use executor::{StepExecutor, StepRun};
pub use extract::{ExtractionStep, Extractor, PlainTextExtractor, EXTRACTION_STEP};
pub use model_step::ModelStep;
pub use pdf::{pdf_text, DocumentExtractor, PdfExtractor, PdfText};
pub use step::{CachePolicy, PipelineStep};
pub use template::{extract_json, PromptTemplate};
pub use templates::{
    SocialTemplate, StrategyTemplate, ThemeTemplate, ValidatorTemplate, VisualTemplate,
    WriterTemplate, SOCIAL_STEP, STRATEGY_STEP, THEME_STEP, VALIDATOR_STEP, VISUAL_STEP,
    WRITER_STEP,
};
