//! Core library for LLM-backed PDF form extraction.
//!
//! This crate provides:
//! - PDF text acquisition in reading order, with per-page markers
//! - Extraction prompt construction with a bounded text budget
//! - An OpenAI-compatible chat client with retry and backoff
//! - Tolerant parsing of the model's JSON reply
//! - A SQLite store for documents, extracted fields and templates
//! - The orchestrating [`ExtractionService`]

pub mod error;
pub mod extraction;
pub mod llm;
pub mod models;
pub mod pdf;
pub mod store;

pub use error::{ErrorKind, FormexError, Result};
pub use extraction::{DocumentHistory, ExtractionService, ParsedResponse, PromptBuilder, parse_response};
pub use llm::{LanguageModel, OpenAiTransport, RetryPolicy, RetryingClient, openai_client};
pub use models::{
    Document, DocumentStatus, ExtractedField, ExtractionConfig, ExtractionRequest,
    ExtractionResult, ExtractionTemplate, FormexConfig,
};
pub use pdf::{PdfExtractor, PdfInfo, TextExtractor};
pub use store::{DocumentStore, SqliteStore};

/// Service wired with the production components.
pub type DefaultService = ExtractionService<PdfExtractor, RetryingClient<OpenAiTransport>, SqliteStore>;

/// Build the production service from configuration.
pub fn default_service(config: &FormexConfig) -> Result<DefaultService> {
    let extractor = PdfExtractor::from_config(&config.pdf);
    let model = openai_client(&config.llm).map_err(error::LlmError::from)?;
    let store = SqliteStore::open(&config.storage.database_path)?;

    Ok(ExtractionService::new(extractor, model, store)
        .with_prompt_builder(PromptBuilder::new(config.extraction.prompt_char_budget)))
}
