//! Data models: persisted records, request-scoped settings, and file configuration.

pub mod config;
pub mod document;
pub mod extraction;

pub use config::FormexConfig;
pub use document::{Document, DocumentStatus, ExtractedField, ExtractionTemplate, NOT_FOUND};
pub use extraction::{ExtractionConfig, ExtractionRequest, ExtractionResult};
