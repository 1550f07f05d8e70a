use crate::context::{StepContext, StepInputs, StepOutput};
use crate::step::{CachePolicy, PipelineStep};
use async_trait::async_trait;
use pressroom_core::{DocumentRef, PressroomError, PressroomResult};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Name of the extraction step in the standard pipeline.
pub const EXTRACTION_STEP: &str = "extraction";

/// Turns a source document into plain text.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extract the document's text.
    async fn extract(&self, document: &DocumentRef) -> PressroomResult<String>;
}

/// Reads UTF-8 text files. PDFs are rejected; see [`crate::PdfExtractor`].
#[derive(Debug, Clone)]
pub struct PlainTextExtractor {
    max_bytes: u64,
}

impl Default for PlainTextExtractor {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
        }
    }
}

impl PlainTextExtractor {
    /// Reject files larger than `max_bytes`.
    pub fn with_max_bytes(max_bytes: u64) -> Self {
        Self { max_bytes }
    }
}

#[async_trait]
impl Extractor for PlainTextExtractor {
    async fn extract(&self, document: &DocumentRef) -> PressroomResult<String> {
        let path = document.source.display();
        if document.extension().as_deref() == Some("pdf") {
            return Err(PressroomError::Extraction(format!(
                "{path}: no PDF extractor configured"
            )));
        }

        let meta = tokio::fs::metadata(&document.source)
            .await
            .map_err(|e| PressroomError::Extraction(format!("{path}: {e}")))?;
        if meta.len() > self.max_bytes {
            return Err(PressroomError::Extraction(format!(
                "{path}: {} bytes exceeds the {} byte limit",
                meta.len(),
                self.max_bytes
            )));
        }

        let bytes = tokio::fs::read(&document.source)
            .await
            .map_err(|e| PressroomError::Extraction(format!("{path}: {e}")))?;
        let text = String::from_utf8(bytes)
            .map_err(|_| PressroomError::Extraction(format!("{path}: not valid UTF-8")))?;

        let text = text.trim();
        if text.is_empty() {
            return Err(PressroomError::Extraction(format!("{path}: document is empty")));
        }
        Ok(text.to_string())
    }
}

/// First pipeline step: extract the source text.
///
/// Always runs; downstream cache keys include its output, so edits to the
/// source invalidate every dependent result.
pub struct ExtractionStep {
    extractor: Arc<dyn Extractor>,
}

impl ExtractionStep {
    /// Wrap an extractor.
    pub fn new(extractor: Arc<dyn Extractor>) -> Self {
        Self { extractor }
    }
}

#[async_trait]
impl PipelineStep for ExtractionStep {
    fn name(&self) -> &str {
        EXTRACTION_STEP
    }

    fn cache_policy(&self) -> CachePolicy {
        CachePolicy::Bypass
    }

    async fn run(&self, ctx: &StepContext, _inputs: &StepInputs) -> PressroomResult<StepOutput> {
        let text = self.extractor.extract(&ctx.document).await?;
        let words = text.split_whitespace().count();
        debug!(document_id = %ctx.document.id, words, "Text extracted");
        Ok(StepOutput::new(json!({
            "text": text,
            "chars": text.chars().count(),
            "words": words,
            "source": ctx.document.source.display().to_string(),
        })))
    }
}
