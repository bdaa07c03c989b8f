//! Persistence of documents, extracted fields and templates.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::StoreError;
use crate::models::{Document, DocumentStatus, ExtractedField, ExtractionTemplate};

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Storage used by the extraction pipeline.
///
/// Documents and fields are append-only apart from the document status, which
/// only moves forward (see [`DocumentStatus::can_transition_to`]).
pub trait DocumentStore: Send + Sync {
    /// Insert a document and return its id.
    fn insert_document(&self, document: &Document) -> Result<i64>;

    /// Move a document to `status`, recording `error_message`.
    ///
    /// Fails with [`StoreError::InvalidTransition`] for a backward move.
    fn update_document_status(
        &self,
        id: i64,
        status: DocumentStatus,
        error_message: Option<&str>,
    ) -> Result<()>;

    /// Insert a batch of fields atomically.
    fn insert_extracted_fields(&self, fields: &[ExtractedField]) -> Result<()>;

    /// Insert a document's fields and move it to `completed` in one transaction.
    ///
    /// Returns the stored fields with their ids. On error nothing is written.
    fn complete_document(&self, id: i64, fields: &[ExtractedField]) -> Result<Vec<ExtractedField>>;

    fn get_document(&self, id: i64) -> Result<Option<Document>>;

    /// Fields of a document in insertion order.
    fn get_fields_for_document(&self, document_id: i64) -> Result<Vec<ExtractedField>>;

    /// Most recent documents first.
    fn list_documents(&self, limit: usize) -> Result<Vec<Document>>;

    /// Templates ordered by name.
    fn list_templates(&self) -> Result<Vec<ExtractionTemplate>>;

    /// Insert a template and return its id. Names are unique.
    fn insert_template(&self, template: &ExtractionTemplate) -> Result<i64>;

    /// Template with this name, if any.
    fn find_template(&self, name: &str) -> Result<Option<ExtractionTemplate>> {
        Ok(self.list_templates()?.into_iter().find(|t| t.name == name))
    }
}
