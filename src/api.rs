//! HTTP surface for the document vault.
//!
//! This module exposes a compact Axum router:
//!
//! - `POST /api/documents` – Multipart upload; stores the file, inserts a
//!   `pending` document row, and queues a background processing run.
//! - `GET /api/documents` – List a user's documents, newest first.
//! - `GET /api/documents/:id` – Fetch a single document.
//! - `DELETE /api/documents/:id` – Remove the row, its index entry, and the
//!   stored file.
//! - `PATCH /api/documents/:id/category` – Manually override the category.
//! - `GET /api/search` – Ranked full-text search with highlighted snippets.
//! - `GET /health` – Liveness probe.
//! - `GET /metrics` – Pipeline counters.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::config::get_config;
use crate::extraction::render;
use crate::processing::VaultApi;
use crate::store::{Category, Document, NewDocument, SearchHit, StoreError};

/// Build the HTTP router exposing the vault API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: VaultApi + 'static,
{
    Router::new()
        .route(
            "/api/documents",
            post(upload_document::<S>).get(list_documents::<S>),
        )
        .route(
            "/api/documents/:id",
            get(get_document::<S>).delete(delete_document::<S>),
        )
        .route("/api/documents/:id/category", patch(set_category::<S>))
        .route("/api/search", get(search_documents::<S>))
        .route("/health", get(health))
        .route("/metrics", get(get_metrics::<S>))
        .with_state(service)
}

/// Accept a multipart upload, persist the file and a `pending` row, then
/// queue a background processing run. Responds before processing finishes.
async fn upload_document<S>(
    State(service): State<Arc<S>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Document>), AppError>
where
    S: VaultApi + 'static,
{
    let mut user_id: Option<String> = None;
    let mut upload: Option<(String, Option<String>, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("malformed multipart body: {err}")))?
    {
        match field.name() {
            Some("user_id") => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(format!("invalid user_id field: {err}")))?;
                user_id = Some(value);
            }
            Some("file") => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::bad_request("file field is missing a filename"))?;
                let content_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|err| AppError::bad_request(format!("failed to read file: {err}")))?;
                upload = Some((filename, content_type, data.to_vec()));
            }
            _ => {}
        }
    }

    let user_id = user_id
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("user_id field is required"))?;
    let (filename, content_type, data) =
        upload.ok_or_else(|| AppError::bad_request("file field is required"))?;

    if !render::is_supported(FsPath::new(&filename)) {
        return Err(AppError::bad_request(format!(
            "unsupported file type: {filename} (accepted: {})",
            render::SUPPORTED_EXTENSIONS.join(", ")
        )));
    }

    let extension = FsPath::new(&filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let stored_name = format!("{}.{extension}", Uuid::new_v4());
    let upload_dir = PathBuf::from(&get_config().upload_dir);
    let file_path = upload_dir.join(&stored_name);

    tokio::fs::create_dir_all(&upload_dir)
        .await
        .map_err(|err| AppError::internal(format!("failed to create upload directory: {err}")))?;
    let file_size = data.len() as i64;
    tokio::fs::write(&file_path, data)
        .await
        .map_err(|err| AppError::internal(format!("failed to store upload: {err}")))?;

    let doc = service
        .create_document(NewDocument {
            user_id,
            filename: stored_name,
            file_path: file_path.to_string_lossy().into_owned(),
            title: filename,
            content_type,
            file_size,
        })
        .await?;

    tracing::info!(document_id = doc.id, title = %doc.title, "Upload accepted");
    Arc::clone(&service).submit(doc.id, file_path);

    Ok((StatusCode::CREATED, Json(doc)))
}

#[derive(Deserialize)]
struct UserScope {
    user_id: String,
}

/// List a user's documents, newest first.
async fn list_documents<S>(
    State(service): State<Arc<S>>,
    Query(scope): Query<UserScope>,
) -> Result<Json<Vec<Document>>, AppError>
where
    S: VaultApi,
{
    let docs = service.documents(&scope.user_id).await?;
    Ok(Json(docs))
}

/// Fetch a single document by id.
async fn get_document<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<i64>,
) -> Result<Json<Document>, AppError>
where
    S: VaultApi,
{
    let doc = service
        .document(id)
        .await?
        .ok_or_else(|| AppError::not_found(id))?;
    Ok(Json(doc))
}

/// Remove a document row, its index entry, and the stored file.
async fn delete_document<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError>
where
    S: VaultApi,
{
    let doc = service
        .delete_document(id)
        .await?
        .ok_or_else(|| AppError::not_found(id))?;

    // Row and index entry are already gone; a missing file is not an error.
    if let Err(err) = tokio::fs::remove_file(&doc.file_path).await {
        tracing::debug!(document_id = id, error = %err, "Stored file not removed");
    }
    tracing::info!(document_id = id, "Document deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Request body for `PATCH /api/documents/:id/category`.
#[derive(Deserialize)]
struct CategoryUpdate {
    category: String,
}

/// Manually override a document's category.
async fn set_category<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<i64>,
    Json(update): Json<CategoryUpdate>,
) -> Result<Json<Document>, AppError>
where
    S: VaultApi,
{
    let category: Category = update
        .category
        .parse()
        .map_err(|()| AppError::bad_request(format!("unknown category: {}", update.category)))?;
    let doc = service.set_category(id, category).await?;
    Ok(Json(doc))
}

#[derive(Deserialize)]
struct SearchParams {
    user_id: String,
    q: String,
}

/// Response body for `GET /api/search`.
#[derive(Serialize)]
struct SearchResponse {
    query: String,
    count: usize,
    results: Vec<SearchHit>,
}

/// Ranked full-text search over a user's documents.
async fn search_documents<S>(
    State(service): State<Arc<S>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError>
where
    S: VaultApi,
{
    let results = service.search(&params.user_id, &params.q).await?;
    Ok(Json(SearchResponse {
        query: params.q,
        count: results.len(),
        results,
    }))
}

/// Liveness probe.
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Return the pipeline counters.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<crate::metrics::MetricsSnapshot>
where
    S: VaultApi,
{
    Json(service.metrics_snapshot())
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(id: i64) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: format!("document {id} not found"),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::not_found(id),
            other => Self::internal(other.to_string()),
        }
    }
}
