//! One-shot recovery sweep for documents stranded in a non-terminal status.
//!
//! Runs the same pipeline as the server, but sequentially and in the
//! foreground, then exits. Useful after a crash or an interrupted deploy when
//! the server itself is not (yet) running.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use docvault::extraction::GeminiClient;
use docvault::extraction::retry::RetryPolicy;
use docvault::metrics::PipelineMetrics;
use docvault::processing::{ProcessingService, VaultApi};
use docvault::store::DocumentStore;
use docvault::{config, logging};

#[tokio::main]
async fn main() {
    config::init_config();
    logging::init_tracing();

    let config = config::get_config();
    let store = Arc::new(DocumentStore::open(&config.database_path).expect("Failed to open store"));
    let extractor = GeminiClient::new(&config.gemini_api_key, &config.gemini_model);
    let retry = match config.extraction_backoff_secs {
        Some(secs) => RetryPolicy::new(RetryPolicy::DEFAULT_MAX_ATTEMPTS, Duration::from_secs(secs)),
        None => RetryPolicy::default(),
    };
    let service = ProcessingService::new(
        Arc::clone(&store),
        Box::new(extractor),
        retry,
        Arc::new(PipelineMetrics::new()),
    );

    let stuck = store
        .stuck_documents()
        .await
        .expect("Failed to scan for stranded documents");
    if stuck.is_empty() {
        tracing::info!("No stranded documents found");
        return;
    }

    tracing::info!(count = stuck.len(), "Reprocessing stranded documents");
    for doc in stuck {
        tracing::info!(document_id = doc.id, title = %doc.title, "Reprocessing");
        service.run(doc.id, Path::new(&doc.file_path)).await;
    }

    let snapshot = service.metrics_snapshot();
    tracing::info!(
        completed = snapshot.documents_completed,
        failed = snapshot.documents_failed,
        "Recovery sweep finished"
    );
}
