//! Extraction client abstraction and adapters.
//!
//! The orchestrator never talks to a model vendor directly: it holds a boxed
//! [`ExtractionClient`] injected at construction, which keeps the pipeline
//! testable with deterministic doubles and the vendor swappable.

mod gemini;
pub mod render;
pub mod retry;

pub use gemini::GeminiClient;

use async_trait::async_trait;
use thiserror::Error;

/// A single page rendering handed to the vision model.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// Encoded image bytes (PNG or JPEG).
    pub data: Vec<u8>,
    /// MIME type of `data`.
    pub mime_type: &'static str,
    /// 1-based page number in the source document.
    pub page_number: usize,
}

/// A page's contribution to extraction.
///
/// Scanned pages render to an image for the vision model; pages that embed
/// no raster but carry a text layer contribute that text directly and skip
/// the model call entirely.
#[derive(Debug, Clone)]
pub enum PageContent {
    /// Rendered raster handed to [`ExtractionClient::extract`].
    Image(PageImage),
    /// Text pulled straight from the page's text layer.
    Text {
        /// 1-based page number in the source document.
        page_number: usize,
        /// Extracted text, trimmed.
        text: String,
    },
}

impl PageContent {
    /// 1-based page number in the source document.
    pub fn page_number(&self) -> usize {
        match self {
            Self::Image(image) => image.page_number,
            Self::Text { page_number, .. } => *page_number,
        }
    }
}

/// Failures raised by extraction backends, classified for the retry policy.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Rate or quota limiting; worth retrying after a backoff.
    #[error("extraction quota exceeded: {0}")]
    QuotaExceeded(String),
    /// Anything else (malformed input, unsupported content, auth/config
    /// problems); never retried.
    #[error("extraction failed: {0}")]
    Failed(String),
}

impl ExtractionError {
    /// Whether the retry policy may re-attempt the call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::QuotaExceeded(_))
    }
}

/// Interface implemented by vision-capable extraction backends.
#[async_trait]
pub trait ExtractionClient: Send + Sync {
    /// Turn an ordered list of page renderings into text.
    async fn extract(&self, pages: &[PageImage], prompt: &str) -> Result<String, ExtractionError>;

    /// Classify previously extracted text, returning the raw model response.
    async fn classify(&self, text: &str, prompt: &str) -> Result<String, ExtractionError>;
}
