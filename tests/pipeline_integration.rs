//! End-to-end pipeline tests with a scripted extraction backend.
//!
//! Each test builds a real in-memory store and drives a processing run over a
//! real temp file; only the model call is a double.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use docvault::extraction::retry::RetryPolicy;
use docvault::extraction::{ExtractionClient, ExtractionError, PageImage};
use docvault::metrics::PipelineMetrics;
use docvault::processing::ProcessingService;
use docvault::store::{Category, DocumentStatus, DocumentStore, NewDocument};

/// Extraction double replaying a scripted sequence of responses.
///
/// Both `extract` and `classify` pull from the same queue, in call order. An
/// exhausted script fails the call, so over-calling shows up as a test
/// failure rather than a hang.
struct ScriptedExtractor {
    responses: Mutex<VecDeque<Result<String, ExtractionError>>>,
    calls: AtomicUsize,
}

impl ScriptedExtractor {
    fn new(responses: Vec<Result<String, ExtractionError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn next_response(&self) -> Result<String, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(ExtractionError::Failed("script exhausted".to_string())))
    }
}

#[async_trait]
impl ExtractionClient for ScriptedExtractor {
    async fn extract(
        &self,
        _pages: &[PageImage],
        _prompt: &str,
    ) -> Result<String, ExtractionError> {
        self.next_response().await
    }

    async fn classify(&self, _text: &str, _prompt: &str) -> Result<String, ExtractionError> {
        self.next_response().await
    }
}

fn quota(msg: &str) -> Result<String, ExtractionError> {
    Err(ExtractionError::QuotaExceeded(msg.to_string()))
}

fn fatal(msg: &str) -> Result<String, ExtractionError> {
    Err(ExtractionError::Failed(msg.to_string()))
}

fn temp_upload(name: &str, contents: &[u8]) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("docvault-pipeline-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("write temp file");
    path
}

struct Harness {
    store: Arc<DocumentStore>,
    extractor: Arc<ScriptedExtractor>,
    service: Arc<ProcessingService>,
}

fn harness(responses: Vec<Result<String, ExtractionError>>) -> Harness {
    let store = Arc::new(DocumentStore::in_memory().expect("in-memory db"));
    let extractor = Arc::new(ScriptedExtractor::new(responses));
    let service = Arc::new(ProcessingService::new(
        Arc::clone(&store),
        Box::new(SharedExtractor(Arc::clone(&extractor))),
        RetryPolicy::new(3, Duration::ZERO),
        Arc::new(PipelineMetrics::new()),
    ));
    Harness {
        store,
        extractor,
        service,
    }
}

/// Thin wrapper so the test keeps a handle to the extractor the service owns.
struct SharedExtractor<T>(Arc<T>);

#[async_trait]
impl<T: ExtractionClient> ExtractionClient for SharedExtractor<T> {
    async fn extract(&self, pages: &[PageImage], prompt: &str) -> Result<String, ExtractionError> {
        self.0.extract(pages, prompt).await
    }

    async fn classify(&self, text: &str, prompt: &str) -> Result<String, ExtractionError> {
        self.0.classify(text, prompt).await
    }
}

async fn wait_for_terminal(store: &DocumentStore, id: i64) -> docvault::store::Document {
    for _ in 0..500 {
        let doc = store.get(id).await.expect("get").expect("present");
        if doc.status.is_terminal() {
            return doc;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("document {id} never reached a terminal status");
}

async fn wait_until(check: impl Fn() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never became true");
}

async fn insert(store: &DocumentStore, title: &str, file_path: &Path) -> i64 {
    let doc = store
        .insert(NewDocument {
            user_id: "user-1".to_string(),
            filename: file_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("stored")
                .to_string(),
            file_path: file_path.to_string_lossy().into_owned(),
            title: title.to_string(),
            content_type: None,
            file_size: 4,
        })
        .await
        .expect("insert");
    doc.id
}

#[tokio::test]
async fn successful_run_commits_text_and_category_together() {
    let h = harness(vec![
        Ok("Total Due: $50".to_string()),
        Ok("This looks like a Receipt".to_string()),
    ]);
    let path = temp_upload("receipt.png", &[0x89, b'P', b'N', b'G']);
    let id = insert(&h.store, "receipt.png", &path).await;

    h.service.run(id, &path).await;

    let doc = h.store.get(id).await.expect("get").expect("present");
    assert_eq!(doc.status, DocumentStatus::Completed);
    assert_eq!(
        doc.extracted_text.as_deref(),
        Some("--- Page 1 ---\nTotal Due: $50")
    );
    assert_eq!(doc.category, Category::Receipt);
    assert!(doc.error_message.is_none());
    assert_eq!(h.extractor.call_count(), 2);

    let hits = h.store.search("user-1", "Total").await.expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, id);
}

#[tokio::test]
async fn unsupported_file_fails_without_calling_the_model() {
    let h = harness(vec![]);
    let path = temp_upload("notes.txt", b"plain text");
    let id = insert(&h.store, "notes.txt", &path).await;

    h.service.run(id, &path).await;

    let doc = h.store.get(id).await.expect("get").expect("present");
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert!(
        doc.error_message
            .as_deref()
            .expect("diagnostic")
            .contains("unsupported file type")
    );
    assert_eq!(h.extractor.call_count(), 0);
}

#[tokio::test]
async fn missing_file_fails_the_run() {
    let h = harness(vec![]);
    let path = PathBuf::from("/nonexistent/scan.png");
    let id = insert(&h.store, "scan.png", &path).await;

    h.service.run(id, &path).await;

    let doc = h.store.get(id).await.expect("get").expect("present");
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert!(
        doc.error_message
            .as_deref()
            .expect("diagnostic")
            .contains("not found")
    );
}

#[tokio::test]
async fn persistent_quota_failure_exhausts_the_attempt_budget() {
    let h = harness(vec![
        quota("rate limited"),
        quota("rate limited"),
        quota("rate limited"),
    ]);
    let path = temp_upload("scan.png", &[0x89, b'P', b'N', b'G']);
    let id = insert(&h.store, "scan.png", &path).await;

    h.service.run(id, &path).await;

    let doc = h.store.get(id).await.expect("get").expect("present");
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert!(doc.extracted_text.is_none());
    assert_eq!(doc.category, Category::Uncategorized);
    assert_eq!(h.extractor.call_count(), 3);
}

#[tokio::test]
async fn fatal_extraction_failure_does_not_retry() {
    let h = harness(vec![fatal("unreadable image")]);
    let path = temp_upload("scan.png", &[0x89, b'P', b'N', b'G']);
    let id = insert(&h.store, "scan.png", &path).await;

    h.service.run(id, &path).await;

    let doc = h.store.get(id).await.expect("get").expect("present");
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert_eq!(h.extractor.call_count(), 1);
}

#[tokio::test]
async fn categorization_failure_fails_the_whole_run() {
    let h = harness(vec![
        Ok("Total Due: $50".to_string()),
        quota("rate limited"),
        quota("rate limited"),
        quota("rate limited"),
    ]);
    let path = temp_upload("scan.png", &[0x89, b'P', b'N', b'G']);
    let id = insert(&h.store, "scan.png", &path).await;

    h.service.run(id, &path).await;

    // Extraction succeeded but nothing is committed: text and category land
    // together or not at all.
    let doc = h.store.get(id).await.expect("get").expect("present");
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert!(doc.extracted_text.is_none());
    assert_eq!(h.extractor.call_count(), 4);
}

#[tokio::test]
async fn terminal_documents_are_never_reprocessed() {
    let h = harness(vec![
        Ok("Total Due: $50".to_string()),
        Ok("Receipt".to_string()),
    ]);
    let path = temp_upload("receipt.png", &[0x89, b'P', b'N', b'G']);
    let id = insert(&h.store, "receipt.png", &path).await;

    h.service.run(id, &path).await;
    assert_eq!(h.extractor.call_count(), 2);

    h.service.run(id, &path).await;

    let doc = h.store.get(id).await.expect("get").expect("present");
    assert_eq!(doc.status, DocumentStatus::Completed);
    assert_eq!(
        doc.extracted_text.as_deref(),
        Some("--- Page 1 ---\nTotal Due: $50")
    );
    assert_eq!(h.extractor.call_count(), 2);
}

#[tokio::test]
async fn recovery_sweep_reprocesses_stranded_documents() {
    let h = harness(vec![
        Ok("Meeting notes from Tuesday".to_string()),
        Ok("Note".to_string()),
    ]);
    let path = temp_upload("stranded.png", &[0x89, b'P', b'N', b'G']);
    let id = insert(&h.store, "stranded.png", &path).await;

    let count = Arc::clone(&h.service)
        .recover_stuck()
        .await
        .expect("recover");
    assert_eq!(count, 1);

    // Runs are spawned; poll until the document reaches a terminal status.
    let doc = wait_for_terminal(&h.store, id).await;
    assert_eq!(doc.status, DocumentStatus::Completed);
    assert_eq!(doc.category, Category::Note);
}

/// Extraction double that blocks mid-extraction until the test releases it.
struct GatedExtractor {
    extract_calls: AtomicUsize,
    classify_calls: AtomicUsize,
    gate: tokio::sync::Semaphore,
}

impl GatedExtractor {
    fn new() -> Self {
        Self {
            extract_calls: AtomicUsize::new(0),
            classify_calls: AtomicUsize::new(0),
            gate: tokio::sync::Semaphore::new(0),
        }
    }
}

#[async_trait]
impl ExtractionClient for GatedExtractor {
    async fn extract(
        &self,
        _pages: &[PageImage],
        _prompt: &str,
    ) -> Result<String, ExtractionError> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        let permit = self.gate.acquire().await.expect("gate closed");
        permit.forget();
        Ok("Total Due: $50".to_string())
    }

    async fn classify(&self, _text: &str, _prompt: &str) -> Result<String, ExtractionError> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        Ok("Receipt".to_string())
    }
}

#[tokio::test]
async fn duplicate_submission_for_an_in_flight_document_is_dropped() {
    let store = Arc::new(DocumentStore::in_memory().expect("in-memory db"));
    let extractor = Arc::new(GatedExtractor::new());
    let service = Arc::new(ProcessingService::new(
        Arc::clone(&store),
        Box::new(SharedExtractor(Arc::clone(&extractor))),
        RetryPolicy::new(3, Duration::ZERO),
        Arc::new(PipelineMetrics::new()),
    ));
    let path = temp_upload("receipt.png", &[0x89, b'P', b'N', b'G']);
    let id = insert(&store, "receipt.png", &path).await;

    Arc::clone(&service).submit(id, path.clone());
    let gated = Arc::clone(&extractor);
    wait_until(move || gated.extract_calls.load(Ordering::SeqCst) == 1).await;

    // First run is parked inside extraction; a second submission for the
    // same id must not start another one.
    Arc::clone(&service).submit(id, path.clone());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(extractor.extract_calls.load(Ordering::SeqCst), 1);

    extractor.gate.add_permits(1);
    let doc = wait_for_terminal(&store, id).await;
    assert_eq!(doc.status, DocumentStatus::Completed);
    assert_eq!(extractor.extract_calls.load(Ordering::SeqCst), 1);
    assert_eq!(extractor.classify_calls.load(Ordering::SeqCst), 1);
}

/// Extraction double whose first call panics; later calls succeed.
struct CrashOnceExtractor {
    calls: AtomicUsize,
}

#[async_trait]
impl ExtractionClient for CrashOnceExtractor {
    async fn extract(
        &self,
        _pages: &[PageImage],
        _prompt: &str,
    ) -> Result<String, ExtractionError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("injected crash");
        }
        Ok("Total Due: $50".to_string())
    }

    async fn classify(&self, _text: &str, _prompt: &str) -> Result<String, ExtractionError> {
        Ok("Receipt".to_string())
    }
}

#[tokio::test]
async fn in_flight_id_is_released_after_a_crashed_run() {
    let store = Arc::new(DocumentStore::in_memory().expect("in-memory db"));
    let extractor = Arc::new(CrashOnceExtractor {
        calls: AtomicUsize::new(0),
    });
    let service = Arc::new(ProcessingService::new(
        Arc::clone(&store),
        Box::new(SharedExtractor(Arc::clone(&extractor))),
        RetryPolicy::new(3, Duration::ZERO),
        Arc::new(PipelineMetrics::new()),
    ));
    let path = temp_upload("receipt.png", &[0x89, b'P', b'N', b'G']);
    let id = insert(&store, "receipt.png", &path).await;

    Arc::clone(&service).submit(id, path.clone());
    let crashed = Arc::clone(&extractor);
    wait_until(move || crashed.calls.load(Ordering::SeqCst) >= 1).await;

    // The crashed run left the document claimed but not terminal. Keep
    // resubmitting until the id is released and a fresh run gets through.
    for _ in 0..500 {
        Arc::clone(&service).submit(id, path.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;
        if extractor.calls.load(Ordering::SeqCst) >= 2 {
            break;
        }
    }

    let doc = wait_for_terminal(&store, id).await;
    assert_eq!(doc.status, DocumentStatus::Completed);
    assert_eq!(
        doc.extracted_text.as_deref(),
        Some("--- Page 1 ---\nTotal Due: $50")
    );
}

fn save_text_only_pdf(path: &Path, text: &str) {
    use lopdf::content::{Content, Operation};
    use lopdf::{Object, Stream, dictionary};

    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 24.into()]),
            Operation::new("Td", vec![72.into(), 720.into()]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id =
        doc.add_object(Stream::new(dictionary! {}, content.encode().expect("encode")));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).expect("save pdf");
}

#[tokio::test]
async fn text_only_pdf_completes_without_vision_calls() {
    // Only the categorization call is scripted: the page text comes straight
    // from the PDF's text layer.
    let h = harness(vec![Ok("Invoice".to_string())]);
    let dir = std::env::temp_dir().join(format!("docvault-pipeline-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    let path = dir.join("invoice.pdf");
    save_text_only_pdf(&path, "Total Due: $50");
    let id = insert(&h.store, "invoice.pdf", &path).await;

    h.service.run(id, &path).await;

    let doc = h.store.get(id).await.expect("get").expect("present");
    assert_eq!(doc.status, DocumentStatus::Completed);
    assert_eq!(doc.category, Category::Invoice);
    let text = doc.extracted_text.as_deref().expect("text");
    assert!(text.starts_with("--- Page 1 ---"), "got {text:?}");
    assert!(text.contains("Total Due: $50"), "got {text:?}");
    assert_eq!(h.extractor.call_count(), 1);
}

#[tokio::test]
async fn pdf_without_page_content_fails_the_run() {
    let h = harness(vec![]);
    let dir = std::env::temp_dir().join(format!("docvault-pipeline-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    let path = dir.join("empty.pdf");
    lopdf::Document::with_version("1.5")
        .save(&path)
        .expect("save pdf");
    let id = insert(&h.store, "empty.pdf", &path).await;

    h.service.run(id, &path).await;

    let doc = h.store.get(id).await.expect("get").expect("present");
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert!(
        doc.error_message
            .as_deref()
            .expect("diagnostic")
            .contains("no renderable")
    );
    assert_eq!(h.extractor.call_count(), 0);
}
