use crate::extract::{Extractor, PlainTextExtractor};
use async_trait::async_trait;
use pressroom_core::{DocumentRef, PressroomError, PressroomResult};
use std::sync::Arc;
use tracing::debug;

/// Text of a parsed PDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfText {
    /// Page texts joined with newlines, in page order.
    pub text: String,
    /// Number of pages in the document.
    pub page_count: usize,
}

/// Extract the text of every page of an in-memory PDF.
///
/// Pages whose text cannot be decoded contribute nothing.
pub fn pdf_text(bytes: &[u8]) -> PressroomResult<PdfText> {
    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|e| PressroomError::Extraction(format!("failed to parse PDF: {e}")))?;

    // get_pages is keyed by page number, so iteration is in page order
    let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
    let mut text = String::new();
    for page in &pages {
        let page_text = doc.extract_text(&[*page]).unwrap_or_default();
        text.push_str(&page_text);
        if !page_text.is_empty() && !page_text.ends_with('\n') {
            text.push('\n');
        }
    }

    Ok(PdfText {
        text,
        page_count: pages.len(),
    })
}

/// Reads the text layer of PDF documents with `lopdf`.
///
/// Scanned PDFs without a text layer are rejected rather than passed on empty.
#[derive(Debug, Clone)]
pub struct PdfExtractor {
    max_bytes: u64,
}

impl Default for PdfExtractor {
    fn default() -> Self {
        Self {
            max_bytes: 100 * 1024 * 1024,
        }
    }
}

impl PdfExtractor {
    /// Reject files larger than `max_bytes`.
    pub fn with_max_bytes(max_bytes: u64) -> Self {
        Self { max_bytes }
    }
}

#[async_trait]
impl Extractor for PdfExtractor {
    async fn extract(&self, document: &DocumentRef) -> PressroomResult<String> {
        let path = document.source.display().to_string();
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
        // Parsing is CPU bound.
        let parsed = tokio::task::spawn_blocking(move || pdf_text(&bytes))
            .await
            .map_err(|e| PressroomError::Extraction(format!("{path}: PDF parser task failed: {e}")))?
            .map_err(|e| PressroomError::Extraction(format!("{path}: {e}")))?;

        let text = parsed.text.trim();
        if text.is_empty() {
            return Err(PressroomError::Extraction(format!(
                "{path}: no extractable text in {} pages",
                parsed.page_count
            )));
        }
        debug!(document_id = %document.id, pages = parsed.page_count, "PDF text extracted");
        Ok(text.to_string())
    }
}

/// Picks an extractor by file extension: PDF files go to [`PdfExtractor`],
/// everything else to [`PlainTextExtractor`].
pub struct DocumentExtractor {
    pdf: Arc<dyn Extractor>,
    text: Arc<dyn Extractor>,
}

impl Default for DocumentExtractor {
    fn default() -> Self {
        Self::new(
            Arc::new(PdfExtractor::default()),
            Arc::new(PlainTextExtractor::default()),
        )
    }
}

impl DocumentExtractor {
    /// Route PDFs to `pdf` and other files to `text`.
    pub fn new(pdf: Arc<dyn Extractor>, text: Arc<dyn Extractor>) -> Self {
        Self { pdf, text }
    }
}

#[async_trait]
impl Extractor for DocumentExtractor {
    async fn extract(&self, document: &DocumentRef) -> PressroomResult<String> {
        match document.extension().as_deref() {
            Some("pdf") => self.pdf.extract(document).await,
            _ => self.text.extract(document).await,
        }
    }
}
