//! Pipeline counters.
//!
//! Plain atomics, no metrics framework: the counts are cheap to keep and the
//! HTTP surface exposes them as a JSON snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Monotonic counters for processing outcomes.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    documents_completed: AtomicU64,
    documents_failed: AtomicU64,
    extraction_retries: AtomicU64,
}

/// Point-in-time copy of the counters, serialized by the metrics endpoint.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Runs that reached `completed`.
    pub documents_completed: u64,
    /// Runs that reached `failed`.
    pub documents_failed: u64,
    /// Extraction calls re-attempted after a quota failure.
    pub extraction_retries: u64,
}

impl PipelineMetrics {
    /// Create a zeroed set of counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a run that reached `completed`.
    pub fn record_completed(&self) {
        self.documents_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a run that reached `failed`.
    pub fn record_failed(&self) {
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a retried extraction call.
    pub fn record_retry(&self) {
        self.extraction_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters at once.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_completed: self.documents_completed.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            extraction_retries: self.extraction_retries.load(Ordering::Relaxed),
        }
    }
}
