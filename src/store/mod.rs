//! SQLite-backed document store with a synchronized full-text index.
//!
//! The store is the durable owner of document rows between processing runs.
//! Every mutation runs in a transaction that also applies the matching
//! full-text index change (see [`index`]), so the searchable shadow can never
//! drift from the committed rows.

mod index;
mod types;

pub use types::{Category, Document, DocumentStatus, NewDocument, SearchHit, StoreError};

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Row, params};
use time::OffsetDateTime;
use tokio::sync::Mutex;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS documents (
         id                INTEGER PRIMARY KEY AUTOINCREMENT,
         user_id           TEXT NOT NULL,
         filename          TEXT NOT NULL,
         file_path         TEXT NOT NULL,
         title             TEXT NOT NULL,
         content_type      TEXT,
         upload_date       TEXT NOT NULL,
         file_size         INTEGER NOT NULL,
         processing_status TEXT NOT NULL DEFAULT 'pending',
         extracted_text    TEXT,
         category          TEXT NOT NULL DEFAULT 'Uncategorized',
         error_message     TEXT
     );
     CREATE INDEX IF NOT EXISTS idx_documents_user ON documents(user_id);
     CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(processing_status);";

/// Durable record of document metadata, lifecycle status, and extraction
/// results, with an FTS5 shadow kept in lockstep.
pub struct DocumentStore {
    conn: Mutex<Connection>,
}

impl DocumentStore {
    /// Create or open a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init_schema(&conn)?;
        tracing::info!(path = %path.as_ref().display(), "Document store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database, used by tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(SCHEMA)?;
        conn.execute_batch(index::SCHEMA)
    }

    /// Insert a new document in `pending` status and index its title.
    pub async fn insert(&self, new: NewDocument) -> Result<Document, StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO documents (user_id, filename, file_path, title, content_type,
                                    upload_date, file_size)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                new.user_id,
                new.filename,
                new.file_path,
                new.title,
                new.content_type,
                current_timestamp_rfc3339(),
                new.file_size,
            ],
        )?;
        let id = tx.last_insert_rowid();
        let doc = fetch(&tx, id)?.ok_or(StoreError::NotFound(id))?;
        index::on_insert(&tx, &doc)?;
        tx.commit()?;
        tracing::debug!(document_id = id, title = %doc.title, "Document inserted");
        Ok(doc)
    }

    /// Fetch a single document by id.
    pub async fn get(&self, id: i64) -> Result<Option<Document>, StoreError> {
        let conn = self.conn.lock().await;
        Ok(fetch(&conn, id)?)
    }

    /// List a user's documents, newest first.
    pub async fn list(&self, user_id: &str) -> Result<Vec<Document>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM documents WHERE user_id = ?1 ORDER BY id DESC"
        ))?;
        let docs = stmt
            .query_map(params![user_id], row_to_document)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(docs)
    }

    /// Remove a document row and its index entry, returning the removed row.
    pub async fn delete(&self, id: i64) -> Result<Option<Document>, StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let Some(doc) = fetch(&tx, id)? else {
            return Ok(None);
        };
        tx.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        index::on_delete(&tx, id)?;
        tx.commit()?;
        tracing::debug!(document_id = id, "Document deleted");
        Ok(Some(doc))
    }

    /// Claim a document for a processing run.
    ///
    /// The update is conditional: it succeeds only while the current status is
    /// `pending` or `processing`, so a run can never pull a document back out
    /// of a terminal state. Returns `false` (leaving the row untouched) when
    /// the document is already terminal, and `NotFound` when no row exists.
    pub async fn claim_processing(&self, id: i64) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE documents SET processing_status = 'processing'
             WHERE id = ?1 AND processing_status IN ('pending', 'processing')",
            params![id],
        )?;
        if changed == 0 {
            if fetch(&tx, id)?.is_none() {
                return Err(StoreError::NotFound(id));
            }
            return Ok(false);
        }
        let doc = fetch(&tx, id)?.ok_or(StoreError::NotFound(id))?;
        index::on_update(&tx, &doc)?;
        tx.commit()?;
        Ok(true)
    }

    /// Commit a successful run: status, extracted text, and category change
    /// together in one transaction, and the stale error is cleared.
    pub async fn mark_completed(
        &self,
        id: i64,
        extracted_text: &str,
        category: Category,
    ) -> Result<Document, StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE documents
             SET processing_status = 'completed', extracted_text = ?2,
                 category = ?3, error_message = NULL
             WHERE id = ?1",
            params![id, extracted_text, category.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        let doc = fetch(&tx, id)?.ok_or(StoreError::NotFound(id))?;
        index::on_update(&tx, &doc)?;
        tx.commit()?;
        Ok(doc)
    }

    /// Commit a failed run. Only status and diagnostic change; previously
    /// committed `extracted_text`/`category` are left untouched so a failing
    /// run never overwrites them with partial data.
    pub async fn mark_failed(&self, id: i64, message: &str) -> Result<Document, StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE documents SET processing_status = 'failed', error_message = ?2
             WHERE id = ?1",
            params![id, message],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        let doc = fetch(&tx, id)?.ok_or(StoreError::NotFound(id))?;
        index::on_update(&tx, &doc)?;
        tx.commit()?;
        Ok(doc)
    }

    /// Manually override a document's category, resyncing the index.
    pub async fn set_category(&self, id: i64, category: Category) -> Result<Document, StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE documents SET category = ?2 WHERE id = ?1",
            params![id, category.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        let doc = fetch(&tx, id)?.ok_or(StoreError::NotFound(id))?;
        index::on_update(&tx, &doc)?;
        tx.commit()?;
        Ok(doc)
    }

    /// Documents left in a non-terminal status, oldest first — candidates for
    /// the recovery sweep.
    pub async fn stuck_documents(&self) -> Result<Vec<Document>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM documents
             WHERE processing_status IN ('pending', 'processing')
             ORDER BY id ASC"
        ))?;
        let docs = stmt
            .query_map([], row_to_document)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(docs)
    }

    /// Ranked full-text search over the user's documents.
    pub async fn search(&self, user_id: &str, query: &str) -> Result<Vec<SearchHit>, StoreError> {
        let conn = self.conn.lock().await;
        index::search(&conn, user_id, query)
    }
}

const COLUMNS: &str = "id, user_id, filename, file_path, title, content_type, upload_date, \
     file_size, processing_status, extracted_text, category, error_message";

fn fetch(conn: &Connection, id: i64) -> rusqlite::Result<Option<Document>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM documents WHERE id = ?1"),
        params![id],
        row_to_document,
    )
    .optional()
}

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        user_id: row.get(1)?,
        filename: row.get(2)?,
        file_path: row.get(3)?,
        title: row.get(4)?,
        content_type: row.get(5)?,
        upload_date: row.get(6)?,
        file_size: row.get(7)?,
        status: parse_status(&row.get::<_, String>(8)?)?,
        extracted_text: row.get(9)?,
        category: parse_category(&row.get::<_, String>(10)?)?,
        error_message: row.get(11)?,
    })
}

pub(crate) fn parse_status(value: &str) -> rusqlite::Result<DocumentStatus> {
    value
        .parse()
        .map_err(|()| rusqlite::Error::InvalidParameterName(format!("unknown status '{value}'")))
}

pub(crate) fn parse_category(value: &str) -> rusqlite::Result<Category> {
    value
        .parse()
        .map_err(|()| rusqlite::Error::InvalidParameterName(format!("unknown category '{value}'")))
}

fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
