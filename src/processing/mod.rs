//! Document processing pipeline: page rendering, extraction, categorization,
//! and lifecycle orchestration.

mod service;
pub mod types;

pub use service::{ProcessingService, VaultApi};
pub use types::ProcessingError;
