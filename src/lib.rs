#![deny(missing_docs)]

//! Core library for the docvault document processing server.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Extraction client abstraction, page rendering, and retry policy.
pub mod extraction;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline metrics helpers.
pub mod metrics;
/// Document processing orchestration.
pub mod processing;
/// SQLite document store and full-text index.
pub mod store;
