//! Full-text index synchronizer.
//!
//! The `documents_fts` FTS5 table shadows `(title, extracted_text, category)`
//! of the `documents` table, keyed by document rowid. The index has no
//! lifecycle of its own: entries are created, replaced, and removed strictly
//! as a consequence of document mutations, and every synchronizer call runs
//! inside the transaction that commits the corresponding row change. Keeping
//! the coupling in the store's control flow (rather than in SQL triggers)
//! makes it visible and testable.

use rusqlite::{Connection, params};

use super::types::{Document, SearchHit, StoreError};

/// Maximum hits returned by a single search.
const SEARCH_LIMIT: i64 = 20;

pub(crate) const SCHEMA: &str = "CREATE VIRTUAL TABLE IF NOT EXISTS documents_fts \
     USING fts5(title, extracted_text, category)";

/// Add the index entry for a freshly inserted document.
pub(crate) fn on_insert(conn: &Connection, doc: &Document) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO documents_fts (rowid, title, extracted_text, category)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            doc.id,
            doc.title,
            doc.extracted_text.as_deref().unwrap_or(""),
            doc.category.as_str(),
        ],
    )?;
    Ok(())
}

/// Replace the index entry after a document mutation.
///
/// FTS5 does not support partial column updates consistently, so the old
/// entry is removed and a fresh one inserted.
pub(crate) fn on_update(conn: &Connection, doc: &Document) -> rusqlite::Result<()> {
    on_delete(conn, doc.id)?;
    on_insert(conn, doc)
}

/// Drop the index entry for a deleted document.
pub(crate) fn on_delete(conn: &Connection, id: i64) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM documents_fts WHERE rowid = ?1", params![id])?;
    Ok(())
}

/// Prefix-match `query` against title, extracted text, and category, scoped
/// to `user_id`, relevance-ranked. An empty or blank query returns no hits
/// without touching the index.
pub(crate) fn search(
    conn: &Connection,
    user_id: &str,
    query: &str,
) -> Result<Vec<SearchHit>, StoreError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "SELECT d.id, d.title, d.category, d.upload_date, d.processing_status,
                snippet(documents_fts, -1, '<b>', '</b>', '...', 16)
         FROM documents_fts
         JOIN documents d ON d.id = documents_fts.rowid
         WHERE documents_fts MATCH ?1 AND d.user_id = ?2
         ORDER BY rank
         LIMIT ?3",
    )?;

    let hits = stmt
        .query_map(
            params![prefix_match_expr(trimmed), user_id, SEARCH_LIMIT],
            |row| {
                Ok(SearchHit {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    category: super::parse_category(&row.get::<_, String>(2)?)?,
                    upload_date: row.get(3)?,
                    status: super::parse_status(&row.get::<_, String>(4)?)?,
                    snippet: row.get(5)?,
                })
            },
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(hits)
}

/// Build an FTS5 prefix-match expression from raw user input.
///
/// The input is quoted so FTS5 operators (`AND`, `NEAR`, `-`, …) are taken
/// literally, then suffixed with `*` for prefix matching.
fn prefix_match_expr(query: &str) -> String {
    format!("\"{}\"*", query.replace('"', "\"\""))
}
