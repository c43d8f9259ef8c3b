//! Processing orchestrator coordinating rendering, extraction, categorization,
//! and document lifecycle updates.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::extraction::retry::RetryPolicy;
use crate::extraction::{ExtractionClient, PageContent, render};
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::processing::types::ProcessingError;
use crate::store::{Category, Document, DocumentStore, NewDocument, SearchHit, StoreError};

const EXTRACTION_PROMPT: &str = "Extract all the text content from this document page. \
     Output only the extracted text, preserving the structure as much as possible.";

const CATEGORIZATION_PROMPT: &str = "Classify the following document text into exactly one of \
     these categories: Invoice, Receipt, Contract, Note, Letter, Form, Other. \
     Respond with only the category name.";

/// Only the head of the extracted text is sent for categorization.
const CATEGORIZATION_PREFIX_CHARS: usize = 2000;

/// Drives a document from upload to a terminal status.
///
/// The service owns the store handle, the injected extraction client, and the
/// retry policy; the HTTP surface and the recovery binary share one instance
/// through an `Arc`. Construct it once near process start.
pub struct ProcessingService {
    store: Arc<DocumentStore>,
    extractor: Box<dyn ExtractionClient>,
    retry: RetryPolicy,
    metrics: Arc<PipelineMetrics>,
    in_flight: Mutex<HashSet<i64>>,
}

/// Abstraction over the pipeline used by external surfaces (HTTP, recovery).
#[async_trait]
pub trait VaultApi: Send + Sync {
    /// Persist a freshly uploaded document in `pending` status.
    async fn create_document(&self, new: NewDocument) -> Result<Document, StoreError>;

    /// Queue a background processing run for a stored document.
    fn submit(self: Arc<Self>, document_id: i64, file_path: PathBuf);

    /// Fetch a single document.
    async fn document(&self, id: i64) -> Result<Option<Document>, StoreError>;

    /// List a user's documents, newest first.
    async fn documents(&self, user_id: &str) -> Result<Vec<Document>, StoreError>;

    /// Remove a document and its index entry, returning the removed row.
    async fn delete_document(&self, id: i64) -> Result<Option<Document>, StoreError>;

    /// Manually override a document's category.
    async fn set_category(&self, id: i64, category: Category) -> Result<Document, StoreError>;

    /// Ranked full-text search over a user's documents.
    async fn search(&self, user_id: &str, query: &str) -> Result<Vec<SearchHit>, StoreError>;

    /// Current pipeline counters.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

impl ProcessingService {
    /// Build the orchestrator around its injected collaborators.
    pub fn new(
        store: Arc<DocumentStore>,
        extractor: Box<dyn ExtractionClient>,
        retry: RetryPolicy,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            store,
            extractor,
            retry,
            metrics,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Handle to the underlying store.
    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    /// Spawn a background run for `document_id`.
    ///
    /// At most one run per document id is in flight at a time; a duplicate
    /// submission while the first is still running is dropped with a warning.
    /// The id is released on every exit path, a panicking run included, so a
    /// crashed run never blocks later submissions.
    pub fn submit(self: Arc<Self>, document_id: i64, file_path: PathBuf) {
        tokio::spawn(async move {
            if !lock_in_flight(&self.in_flight).insert(document_id) {
                tracing::warn!(document_id, "Run already in flight; dropping submission");
                return;
            }
            let _guard = InFlightGuard {
                in_flight: &self.in_flight,
                document_id,
            };
            self.run(document_id, &file_path).await;
        });
    }

    /// Execute one processing run to its terminal status.
    ///
    /// Claims the document first; a document already in a terminal status is
    /// skipped without touching the row.
    pub async fn run(&self, document_id: i64, file_path: &Path) {
        match self.store.claim_processing(document_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(document_id, "Document already terminal; skipping run");
                return;
            }
            Err(err) => {
                tracing::error!(document_id, error = %err, "Failed to claim document");
                return;
            }
        }

        match self.process(file_path).await {
            Ok((text, category)) => {
                match self
                    .store
                    .mark_completed(document_id, &text, category)
                    .await
                {
                    Ok(_) => {
                        self.metrics.record_completed();
                        tracing::info!(
                            document_id,
                            category = category.as_str(),
                            chars = text.len(),
                            "Processing completed"
                        );
                    }
                    Err(err) => {
                        tracing::error!(document_id, error = %err, "Failed to commit completion");
                    }
                }
            }
            Err(err) => {
                self.metrics.record_failed();
                tracing::warn!(document_id, error = %err, "Processing failed");
                if let Err(store_err) = self.store.mark_failed(document_id, &err.to_string()).await
                {
                    tracing::error!(document_id, error = %store_err, "Failed to record failure");
                }
            }
        }
    }

    /// Re-queue every document stranded in a non-terminal status, returning
    /// how many were submitted.
    pub async fn recover_stuck(self: Arc<Self>) -> Result<usize, StoreError> {
        let stuck = self.store.stuck_documents().await?;
        let count = stuck.len();
        for doc in stuck {
            tracing::info!(
                document_id = doc.id,
                status = doc.status.as_str(),
                "Re-queuing stranded document"
            );
            Arc::clone(&self).submit(doc.id, PathBuf::from(&doc.file_path));
        }
        Ok(count)
    }

    /// Render, extract page by page, and categorize.
    ///
    /// Image pages go through the vision model under the retry policy; pages
    /// that rendered as a text layer contribute their text directly.
    /// Extraction and categorization commit together: a categorization failure
    /// fails the whole run rather than leaving half-attributed text behind.
    async fn process(&self, file_path: &Path) -> Result<(String, Category), ProcessingError> {
        let pages = render::page_contents_async(file_path.to_path_buf()).await?;

        let mut sections = Vec::with_capacity(pages.len());
        for page in &pages {
            let page_text = match page {
                PageContent::Image(image) => {
                    self.retry
                        .run(|attempt| {
                            if attempt > 1 {
                                self.metrics.record_retry();
                            }
                            self.extractor
                                .extract(std::slice::from_ref(image), EXTRACTION_PROMPT)
                        })
                        .await?
                }
                PageContent::Text { text, .. } => text.clone(),
            };
            sections.push(format!(
                "--- Page {} ---\n{}",
                page.page_number(),
                page_text.trim()
            ));
        }
        let text = sections.join("\n\n");

        let response = self
            .retry
            .run(|attempt| {
                if attempt > 1 {
                    self.metrics.record_retry();
                }
                self.extractor
                    .classify(categorization_prefix(&text), CATEGORIZATION_PROMPT)
            })
            .await?;
        let category = Category::normalize(&response);

        Ok((text, category))
    }
}

#[async_trait]
impl VaultApi for ProcessingService {
    async fn create_document(&self, new: NewDocument) -> Result<Document, StoreError> {
        self.store.insert(new).await
    }

    fn submit(self: Arc<Self>, document_id: i64, file_path: PathBuf) {
        ProcessingService::submit(self, document_id, file_path);
    }

    async fn document(&self, id: i64) -> Result<Option<Document>, StoreError> {
        self.store.get(id).await
    }

    async fn documents(&self, user_id: &str) -> Result<Vec<Document>, StoreError> {
        self.store.list(user_id).await
    }

    async fn delete_document(&self, id: i64) -> Result<Option<Document>, StoreError> {
        self.store.delete(id).await
    }

    async fn set_category(&self, id: i64, category: Category) -> Result<Document, StoreError> {
        self.store.set_category(id, category).await
    }

    async fn search(&self, user_id: &str, query: &str) -> Result<Vec<SearchHit>, StoreError> {
        self.store.search(user_id, query).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

fn lock_in_flight(set: &Mutex<HashSet<i64>>) -> MutexGuard<'_, HashSet<i64>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes the document id from the in-flight set when the run ends,
/// regardless of how it ends.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<i64>>,
    document_id: i64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock_in_flight(self.in_flight).remove(&self.document_id);
    }
}

/// First [`CATEGORIZATION_PREFIX_CHARS`] characters of `text`, respecting
/// char boundaries.
fn categorization_prefix(text: &str) -> &str {
    match text.char_indices().nth(CATEGORIZATION_PREFIX_CHARS) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}
