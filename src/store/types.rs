//! Row types and error definitions for the document store.

use serde::Serialize;
use thiserror::Error;

/// Errors emitted by the document store and the full-text index.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No document row exists for the requested id.
    #[error("document {0} not found")]
    NotFound(i64),
    /// Underlying SQLite operation failed.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Lifecycle status of a document's processing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Uploaded, not yet picked up by a processing run.
    Pending,
    /// A run has claimed the document and is extracting text.
    Processing,
    /// Terminal: extraction and categorization committed.
    Completed,
    /// Terminal: the run failed and `error_message` is set.
    Failed,
}

impl DocumentStatus {
    /// Stable string form stored in the `processing_status` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether no further automatic transition leaves this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed category taxonomy assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Category {
    /// Bill requesting payment.
    Invoice,
    /// Proof of a completed payment.
    Receipt,
    /// Signed agreement between parties.
    Contract,
    /// Short informal note or memo.
    Note,
    /// Correspondence addressed to a person or organization.
    Letter,
    /// Structured fill-in form.
    Form,
    /// Recognized document that fits no other category.
    Other,
    /// Default until a classifier run succeeds.
    Uncategorized,
}

impl Category {
    /// Categories a classifier response may resolve to, in match-priority order.
    pub const CLASSIFIABLE: [Category; 7] = [
        Category::Invoice,
        Category::Receipt,
        Category::Contract,
        Category::Note,
        Category::Letter,
        Category::Form,
        Category::Other,
    ];

    /// Stable string form stored in the `category` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invoice => "Invoice",
            Self::Receipt => "Receipt",
            Self::Contract => "Contract",
            Self::Note => "Note",
            Self::Letter => "Letter",
            Self::Form => "Form",
            Self::Other => "Other",
            Self::Uncategorized => "Uncategorized",
        }
    }

    /// Collapse a free-form classifier response onto the closed set.
    ///
    /// Case-insensitive substring match in declaration order; the first
    /// category mentioned wins. Anything unrecognized becomes
    /// [`Category::Uncategorized`] — by policy this is not an error.
    pub fn normalize(response: &str) -> Self {
        let lowered = response.to_lowercase();
        Self::CLASSIFIABLE
            .into_iter()
            .find(|category| lowered.contains(&category.as_str().to_lowercase()))
            .unwrap_or(Self::Uncategorized)
    }
}

impl std::str::FromStr for Category {
    type Err = ();

    /// Exact (case-insensitive) member lookup, used to validate manual
    /// category overrides. Unlike [`Category::normalize`] this rejects
    /// anything that is not a member name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::CLASSIFIABLE
            .into_iter()
            .chain(std::iter::once(Self::Uncategorized))
            .find(|category| category.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or(())
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored document row.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    /// Row id, assigned at insert, immutable afterwards.
    pub id: i64,
    /// Owner of the document.
    pub user_id: String,
    /// Stored (UUID-based) file name under the upload directory.
    pub filename: String,
    /// Absolute or upload-dir-relative path to the source file.
    pub file_path: String,
    /// Original file name as uploaded; searchable.
    pub title: String,
    /// MIME type reported at upload time, when available.
    pub content_type: Option<String>,
    /// RFC3339 upload timestamp.
    pub upload_date: String,
    /// Source file size in bytes.
    pub file_size: i64,
    /// Current lifecycle status.
    pub status: DocumentStatus,
    /// Full extracted text; present once a run completes.
    pub extracted_text: Option<String>,
    /// Assigned category; `Uncategorized` until classified.
    pub category: Category,
    /// Diagnostic from the most recent failed run, if any.
    pub error_message: Option<String>,
}

/// Fields supplied by the upload surface when inserting a document.
#[derive(Debug, Clone)]
pub struct NewDocument {
    /// Owner of the document.
    pub user_id: String,
    /// Stored file name under the upload directory.
    pub filename: String,
    /// Path the processing run will read the source file from.
    pub file_path: String,
    /// Original file name; indexed as the document title.
    pub title: String,
    /// MIME type reported by the uploader, when available.
    pub content_type: Option<String>,
    /// Source file size in bytes.
    pub file_size: i64,
}

/// A single ranked full-text search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    /// Matched document id.
    pub id: i64,
    /// Document title.
    pub title: String,
    /// Assigned category.
    pub category: Category,
    /// RFC3339 upload timestamp.
    pub upload_date: String,
    /// Current lifecycle status.
    pub status: DocumentStatus,
    /// Bounded excerpt with `<b>`/`</b>` match markers.
    pub snippet: String,
}
