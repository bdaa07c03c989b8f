//! Extraction orchestrator.
//!
//! Runs one document through validation, text extraction, the model and the
//! parser, and records the outcome. Every run ends with the document at
//! `completed` or `failed`; faults are reported in the returned
//! [`ExtractionResult`] rather than propagated.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::parser::parse_response;
use super::prompt::{PromptBuilder, SYSTEM_PROMPT};
use crate::error::{FormexError, Result};
use crate::llm::{ChatRequest, LanguageModel, ModelParams};
use crate::models::{
    Document, DocumentStatus, ExtractedField, ExtractionRequest, ExtractionResult,
    ExtractionTemplate,
};
use crate::pdf::TextExtractor;
use crate::store::DocumentStore;

/// A stored document together with its fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentHistory {
    pub document: Document,
    pub fields: Vec<ExtractedField>,
}

/// A failed run step, with the model output when one was received.
struct RunFailure {
    error: FormexError,
    raw_response: Option<String>,
}

impl<E: Into<FormexError>> From<E> for RunFailure {
    fn from(error: E) -> Self {
        Self {
            error: error.into(),
            raw_response: None,
        }
    }
}

/// Fields and model output of a successful run.
struct RunOutput {
    fields: Vec<ExtractedField>,
    raw_response: String,
}

/// Sequences the pipeline components for each request.
pub struct ExtractionService<X, M, S> {
    extractor: X,
    model: M,
    store: S,
    prompts: PromptBuilder,
}

impl<X, M, S> ExtractionService<X, M, S>
where
    X: TextExtractor,
    M: LanguageModel,
    S: DocumentStore,
{
    pub fn new(extractor: X, model: M, store: S) -> Self {
        Self {
            extractor,
            model,
            store,
            prompts: PromptBuilder::default(),
        }
    }

    /// Use a custom prompt builder (e.g. a different character budget).
    pub fn with_prompt_builder(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Run the full pipeline for one uploaded document.
    pub fn process(&self, request: ExtractionRequest) -> ExtractionResult {
        let started = Instant::now();

        let mut document = Document::new(
            request.filename.clone(),
            request.data.len() as u64,
            request.config.form_type.clone(),
        );
        document.status = DocumentStatus::Processing;

        let id = match self.store.insert_document(&document) {
            Ok(id) => id,
            Err(e) => {
                let failure = RunFailure::from(e);
                error!("Could not record upload of {}: {}", request.filename, failure.error);
                document.status = DocumentStatus::Failed;
                document.error_message = Some(failure.error.to_string());
                return failed_result(document, failure, started);
            }
        };
        document.id = Some(id);
        debug!("Processing document {} ({})", id, request.filename);

        let outcome = catch_unwind(AssertUnwindSafe(|| self.run(id, &request)));
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(panic) => Err(RunFailure::from(FormexError::Internal(panic_message(
                panic.as_ref(),
            )))),
        };

        match outcome {
            Ok(output) => {
                let document = self.snapshot(document, DocumentStatus::Completed, None);
                info!(
                    "Extracted {} fields from {} in {:?}",
                    output.fields.len(),
                    request.filename,
                    started.elapsed()
                );
                ExtractionResult {
                    document,
                    fields: output.fields,
                    elapsed: started.elapsed(),
                    success: true,
                    error: None,
                    error_kind: None,
                    raw_response: Some(output.raw_response),
                }
            }
            Err(failure) => {
                let message = failure.error.to_string();
                error!("Extraction of {} failed: {}", request.filename, message);

                if let Err(e) =
                    self.store
                        .update_document_status(id, DocumentStatus::Failed, Some(&message))
                {
                    warn!("Could not mark document {} as failed: {}", id, e);
                }

                let document = self.snapshot(document, DocumentStatus::Failed, Some(message));
                failed_result(document, failure, started)
            }
        }
    }

    fn run(&self, id: i64, request: &ExtractionRequest) -> std::result::Result<RunOutput, RunFailure> {
        let config = &request.config;

        self.extractor.validate(&request.data)?;
        config.validate()?;
        let fields = config.normalized_fields();

        let text = self.extractor.extract(&request.data)?;
        debug!(
            "Document {}: {} characters from {} pages",
            id,
            text.text.len(),
            text.pages.len()
        );
        if !text.skipped_pages.is_empty() {
            warn!("Document {}: skipped pages {:?}", id, text.skipped_pages);
        }

        let prompt = self.prompts.build_with_instructions(
            &text.text,
            &fields,
            &config.form_type,
            config.instructions.as_deref(),
        );
        let chat = ChatRequest::new(SYSTEM_PROMPT, prompt, ModelParams::from(config));
        let raw = self.model.complete(&chat)?;

        let parsed = parse_response(&raw, &fields).map_err(|e| RunFailure {
            error: e.into(),
            raw_response: Some(raw.clone()),
        })?;

        let extracted_at = Utc::now();
        let records: Vec<ExtractedField> = fields
            .iter()
            .map(|name| ExtractedField {
                id: None,
                document_id: id,
                field_name: name.clone(),
                value: parsed.value(name).unwrap_or(crate::models::NOT_FOUND).to_string(),
                confidence: parsed.confidence(name),
                justification: parsed.reasoning(name).map(str::to_string),
                extracted_at,
            })
            .collect();

        match self.store.complete_document(id, &records) {
            Ok(fields) => Ok(RunOutput {
                fields,
                raw_response: raw,
            }),
            Err(e) => Err(RunFailure {
                error: e.into(),
                raw_response: Some(raw),
            }),
        }
    }

    /// Stored document, or the local copy moved to `status` if it cannot be read.
    fn snapshot(&self, mut document: Document, status: DocumentStatus, error: Option<String>) -> Document {
        if let Some(id) = document.id {
            match self.store.get_document(id) {
                Ok(Some(stored)) => return stored,
                Ok(None) => warn!("Document {} disappeared from the store", id),
                Err(e) => warn!("Could not reload document {}: {}", id, e),
            }
        }
        document.status = status;
        document.error_message = error;
        document
    }

    /// Recent documents with their fields, newest first.
    pub fn history(&self, limit: usize) -> Result<Vec<DocumentHistory>> {
        self.store
            .list_documents(limit)?
            .into_iter()
            .map(|document| {
                let fields = match document.id {
                    Some(id) => self.store.get_fields_for_document(id)?,
                    None => Vec::new(),
                };
                Ok(DocumentHistory { document, fields })
            })
            .collect()
    }

    /// One document with its fields.
    pub fn document(&self, id: i64) -> Result<Option<DocumentHistory>> {
        let Some(document) = self.store.get_document(id)? else {
            return Ok(None);
        };
        let fields = self.store.get_fields_for_document(id)?;
        Ok(Some(DocumentHistory { document, fields }))
    }

    pub fn templates(&self) -> Result<Vec<ExtractionTemplate>> {
        Ok(self.store.list_templates()?)
    }

    pub fn template(&self, name: &str) -> Result<Option<ExtractionTemplate>> {
        Ok(self.store.find_template(name)?)
    }

    pub fn create_template(&self, template: &ExtractionTemplate) -> Result<i64> {
        let id = self.store.insert_template(template)?;
        info!("Created template '{}'", template.name);
        Ok(id)
    }

    /// Install the built-in templates into an empty store. Returns how many were added.
    pub fn seed_default_templates(&self) -> Result<usize> {
        if !self.store.list_templates()?.is_empty() {
            return Ok(0);
        }

        let defaults = ExtractionTemplate::defaults();
        for template in &defaults {
            self.store.insert_template(template)?;
        }
        debug!("Seeded {} default templates", defaults.len());
        Ok(defaults.len())
    }

    /// Model ids offered by the model API.
    pub fn available_models(&self) -> Result<Vec<String>> {
        Ok(self.model.list_models()?)
    }
}

fn failed_result(document: Document, failure: RunFailure, started: Instant) -> ExtractionResult {
    ExtractionResult {
        document,
        fields: Vec::new(),
        elapsed: started.elapsed(),
        success: false,
        error: Some(failure.error.to_string()),
        error_kind: Some(failure.error.kind()),
        raw_response: failure.raw_response,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApiError, ErrorKind, LlmError, PdfError, StoreError};
    use crate::models::{ExtractionConfig, FormexConfig};
    use crate::pdf::{ExtractedText, PdfInfo, PdfPage};
    use crate::store::SqliteStore;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Extractor returning fixed text, or no pages when `text` is `None`.
    struct FakeExtractor {
        text: Option<String>,
    }

    impl TextExtractor for FakeExtractor {
        fn extract(&self, _data: &[u8]) -> crate::pdf::Result<ExtractedText> {
            match &self.text {
                Some(text) => Ok(ExtractedText::from_pages(
                    vec![PdfPage {
                        number: 1,
                        text: text.clone(),
                    }],
                    Vec::new(),
                    1,
                )),
                None => Err(PdfError::NoPages),
            }
        }

        fn info(&self, data: &[u8]) -> crate::pdf::Result<PdfInfo> {
            Ok(PdfInfo {
                page_count: 1,
                size: data.len() as u64,
                metadata: Default::default(),
            })
        }
    }

    enum Reply {
        Text(&'static str),
        RateLimited,
        Panic,
    }

    struct FakeModel {
        reply: Reply,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl FakeModel {
        fn new(reply: Reply) -> Self {
            Self {
                reply,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    impl LanguageModel for FakeModel {
        fn complete(&self, request: &ChatRequest) -> std::result::Result<String, LlmError> {
            self.requests.lock().unwrap().push(request.clone());
            match self.reply {
                Reply::Text(text) => Ok(text.to_string()),
                Reply::RateLimited => Err(LlmError::RateLimitExhausted {
                    attempts: 4,
                    message: "slow down".to_string(),
                }),
                Reply::Panic => panic!("model exploded"),
            }
        }

        fn list_models(&self) -> std::result::Result<Vec<String>, LlmError> {
            Err(LlmError::Api(ApiError::Auth("no key".to_string())))
        }
    }

    /// In-memory store whose completion step always fails.
    struct BrokenCompletionStore {
        inner: SqliteStore,
    }

    impl DocumentStore for BrokenCompletionStore {
        fn insert_document(&self, document: &Document) -> crate::store::Result<i64> {
            self.inner.insert_document(document)
        }

        fn update_document_status(
            &self,
            id: i64,
            status: DocumentStatus,
            error_message: Option<&str>,
        ) -> crate::store::Result<()> {
            self.inner.update_document_status(id, status, error_message)
        }

        fn insert_extracted_fields(&self, fields: &[ExtractedField]) -> crate::store::Result<()> {
            self.inner.insert_extracted_fields(fields)
        }

        fn complete_document(
            &self,
            _id: i64,
            _fields: &[ExtractedField],
        ) -> crate::store::Result<Vec<ExtractedField>> {
            Err(StoreError::Poisoned)
        }

        fn get_document(&self, id: i64) -> crate::store::Result<Option<Document>> {
            self.inner.get_document(id)
        }

        fn get_fields_for_document(&self, document_id: i64) -> crate::store::Result<Vec<ExtractedField>> {
            self.inner.get_fields_for_document(document_id)
        }

        fn list_documents(&self, limit: usize) -> crate::store::Result<Vec<Document>> {
            self.inner.list_documents(limit)
        }

        fn list_templates(&self) -> crate::store::Result<Vec<ExtractionTemplate>> {
            self.inner.list_templates()
        }

        fn insert_template(&self, template: &ExtractionTemplate) -> crate::store::Result<i64> {
            self.inner.insert_template(template)
        }
    }

    const PARTIAL: &str = r#"Sure! {"extracted_data": {"name": "Jane Doe", "extra": "x"}, "confidence_scores": {"name": 0.9}, "reasoning": {"name": "found in header"}}"#;

    fn service(
        text: Option<&str>,
        reply: Reply,
    ) -> ExtractionService<FakeExtractor, FakeModel, SqliteStore> {
        ExtractionService::new(
            FakeExtractor {
                text: text.map(str::to_string),
            },
            FakeModel::new(reply),
            SqliteStore::open_in_memory().unwrap(),
        )
    }

    fn request(fields: &[&str]) -> ExtractionRequest {
        let config = ExtractionConfig::new("Registration", fields.iter().copied(), &FormexConfig::default());
        ExtractionRequest::new(vec![0u8; 1024], "form.pdf", config)
    }

    #[test]
    fn test_success_covers_every_requested_field() {
        let service = service(Some("Name: Jane Doe"), Reply::Text(PARTIAL));
        let result = service.process(request(&["name", "email", "name"]));

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.document.status, DocumentStatus::Completed);

        let names: Vec<_> = result.fields.iter().map(|f| f.field_name.as_str()).collect();
        assert_eq!(names, vec!["name", "email"]);

        let name = result.field("name").unwrap();
        assert_eq!(name.value, "Jane Doe");
        assert_eq!(name.confidence, Some(0.9));
        assert!(name.id.is_some());

        let email = result.field("email").unwrap();
        assert_eq!(email.value, "not found");
        assert_eq!(email.confidence, Some(0.0));
        assert_eq!(email.justification.as_deref(), Some("field not found in document"));

        assert_eq!(result.found_ratio(), 0.5);
        assert_eq!(result.raw_response.as_deref(), Some(PARTIAL));
    }

    #[test]
    fn test_prompt_carries_fields_and_instructions() {
        let service = service(Some("Name: Jane Doe"), Reply::Text(PARTIAL));
        let mut req = request(&["name"]);
        req.config.instructions = Some("Use full legal names".to_string());
        req.config.model = "gpt-5-mini".to_string();

        service.process(req);

        let requests = service.model().requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].system, SYSTEM_PROMPT);
        assert_eq!(requests[0].params.model, "gpt-5-mini");
        assert!(requests[0].prompt.contains("\"name\""));
        assert!(requests[0].prompt.contains("Use full legal names"));
        assert!(requests[0].prompt.contains("--- Page 1 ---\nName: Jane Doe"));
    }

    #[test]
    fn test_zero_pages_fails_and_is_persisted() {
        let service = service(None, Reply::Text(PARTIAL));
        let result = service.process(request(&["name"]));

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Extraction));
        assert!(result.fields.is_empty());
        assert_eq!(service.model().calls(), 0);

        let id = result.document.id.unwrap();
        let stored = service.store().get_document(id).unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Failed);
        assert!(stored.error_message.unwrap().contains("empty or corrupted"));
        assert!(service.store().get_fields_for_document(id).unwrap().is_empty());
    }

    #[test]
    fn test_tiny_upload_is_rejected_but_audited() {
        let service = service(Some("text"), Reply::Text(PARTIAL));
        let mut req = request(&["name"]);
        req.data = vec![0u8; 50];

        let result = service.process(req);

        assert_eq!(result.error_kind, Some(ErrorKind::Validation));
        assert!(result.error.unwrap().contains("too small"));
        assert_eq!(result.document.status, DocumentStatus::Failed);
        assert_eq!(service.history(10).unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_config_skips_model_call() {
        let service = service(Some("text"), Reply::Text(PARTIAL));
        let result = service.process(request(&[" ", ""]));

        assert_eq!(result.error_kind, Some(ErrorKind::Validation));
        assert!(result.error.unwrap().contains("at least one extraction field"));
        assert_eq!(service.model().calls(), 0);
    }

    #[test]
    fn test_model_failure() {
        let service = service(Some("text"), Reply::RateLimited);
        let result = service.process(request(&["name"]));

        assert_eq!(result.error_kind, Some(ErrorKind::Model));
        assert!(result.error.unwrap().contains("rate limit exceeded"));
        assert_eq!(result.document.status, DocumentStatus::Failed);
    }

    #[test]
    fn test_unparseable_reply_keeps_raw_response() {
        let service = service(Some("text"), Reply::Text("I cannot help with that."));
        let result = service.process(request(&["name"]));

        assert_eq!(result.error_kind, Some(ErrorKind::Parse));
        assert_eq!(result.raw_response.as_deref(), Some("I cannot help with that."));
        assert!(result.fields.is_empty());
    }

    #[test]
    fn test_persistence_failure_leaves_no_fields() {
        let service = ExtractionService::new(
            FakeExtractor {
                text: Some("Name: Jane Doe".to_string()),
            },
            FakeModel::new(Reply::Text(PARTIAL)),
            BrokenCompletionStore {
                inner: SqliteStore::open_in_memory().unwrap(),
            },
        );

        let result = service.process(request(&["name", "email"]));

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Persistence));
        assert_eq!(result.document.status, DocumentStatus::Failed);
        assert_eq!(result.raw_response.as_deref(), Some(PARTIAL));
        assert!(result.fields.is_empty());

        let id = result.document.id.unwrap();
        let stored = service.store().get_document(id).unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Failed);
        assert!(service.store().get_fields_for_document(id).unwrap().is_empty());
    }

    #[test]
    fn test_panic_becomes_failed_result() {
        let service = service(Some("text"), Reply::Panic);
        let result = service.process(request(&["name"]));

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Internal));
        assert!(result.error.unwrap().contains("model exploded"));

        let id = result.document.id.unwrap();
        let stored = service.store().get_document(id).unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Failed);
    }

    #[test]
    fn test_history_and_document() {
        let service = service(Some("Name: Jane Doe"), Reply::Text(PARTIAL));
        let ok = service.process(request(&["name", "email"]));
        service.process(request(&[]));

        let history = service.history(10).unwrap();
        assert_eq!(history.len(), 2);

        let entry = service.document(ok.document.id.unwrap()).unwrap().unwrap();
        assert_eq!(entry.fields.len(), 2);
        assert!(service.document(999).unwrap().is_none());
    }

    #[test]
    fn test_seed_default_templates_once() {
        let service = service(None, Reply::Text(PARTIAL));

        assert_eq!(service.seed_default_templates().unwrap(), 3);
        assert_eq!(service.seed_default_templates().unwrap(), 0);
        assert_eq!(service.templates().unwrap().len(), 3);
        assert!(service.template("Loan Application").unwrap().is_some());
    }

    #[test]
    fn test_create_template_rejects_duplicates() {
        let service = service(None, Reply::Text(PARTIAL));
        let template = ExtractionTemplate::new("W-9", "Tax form", ["name", "tin"]);

        service.create_template(&template).unwrap();
        let err = service.create_template(&template).unwrap_err();
        assert!(matches!(err, FormexError::Store(StoreError::DuplicateTemplate(_))));
    }

    #[test]
    fn test_available_models_surfaces_model_error() {
        let service = service(None, Reply::Text(PARTIAL));
        let err = service.available_models().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Model);
    }
}
