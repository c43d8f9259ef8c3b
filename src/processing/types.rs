//! Error type for a processing run.

use thiserror::Error;

use crate::extraction::ExtractionError;
use crate::extraction::render::RenderError;
use crate::store::StoreError;

/// Any failure that terminates a processing run.
///
/// The display string is what lands in the document's `error_message`, so
/// each variant renders as an operator-readable diagnostic.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// The source file could not be rendered into page images.
    #[error(transparent)]
    Render(#[from] RenderError),
    /// The extraction backend failed terminally (retries exhausted or fatal).
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    /// The document store rejected a lifecycle update.
    #[error("document store failure: {0}")]
    Store(#[from] StoreError),
}
