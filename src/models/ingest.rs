//! Ingestion request type.

use super::SourceDescriptor;

/// One document handed over by the extraction layer.
///
/// # Example
///
/// ```rust
/// use docanon::{IngestRequest, SourceDescriptor};
///
/// let request = IngestRequest::new(
///     "Memo dated 3/4/19 re: travel arrangements",
///     SourceDescriptor::new("court-filings", "https://example.org/docket/12.pdf"),
/// )
/// .with_page_count(1);
/// assert!(request.ocr);
/// ```
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// Extracted text, as produced by OCR, a text layer, or email parsing.
    pub raw_text: String,
    /// Provenance of this copy.
    pub source: SourceDescriptor,
    /// Page count reported by the extractor.
    pub page_count: Option<u32>,
    /// Size of the original artifact in bytes.
    pub byte_count: Option<u64>,
    /// Whether the text came from OCR. Native text gets no quality score.
    pub ocr: bool,
}

impl IngestRequest {
    /// Creates a request for OCR'd text.
    #[must_use]
    pub fn new(raw_text: impl Into<String>, source: SourceDescriptor) -> Self {
        Self {
            raw_text: raw_text.into(),
            source,
            page_count: None,
            byte_count: None,
            ocr: true,
        }
    }

    /// Sets the page count.
    #[must_use]
    pub const fn with_page_count(mut self, pages: u32) -> Self {
        self.page_count = Some(pages);
        self
    }

    /// Sets the byte count.
    #[must_use]
    pub const fn with_byte_count(mut self, bytes: u64) -> Self {
        self.byte_count = Some(bytes);
        self
    }

    /// Marks the text as OCR output (`true`) or a native text layer (`false`).
    #[must_use]
    pub const fn with_ocr(mut self, ocr: bool) -> Self {
        self.ocr = ocr;
        self
    }
}
