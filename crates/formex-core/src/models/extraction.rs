//! Request-scoped extraction settings and the result of a pipeline run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::{FormexConfig, MAX_MAX_TOKENS, MIN_MAX_TOKENS, TEMPERATURE_RANGE};
use super::document::{Document, ExtractedField, ExtractionTemplate};
use crate::error::{ErrorKind, ValidationError};

/// Settings for a single extraction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Declared form type, used in the prompt.
    pub form_type: String,

    /// Fields to extract.
    pub fields: Vec<String>,

    /// Model identifier.
    pub model: String,

    /// Sampling temperature (0.0 - 2.0).
    pub temperature: f32,

    /// Completion token budget.
    pub max_tokens: u32,

    /// Extra instructions appended to the prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl ExtractionConfig {
    /// Create a config using the defaults from `config`.
    pub fn new<I, S>(form_type: impl Into<String>, fields: I, config: &FormexConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            form_type: form_type.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            model: config.llm.default_model.clone(),
            temperature: config.extraction.default_temperature,
            max_tokens: config.extraction.default_max_tokens,
            instructions: None,
        }
    }

    /// Pre-populate from a template.
    pub fn from_template(template: &ExtractionTemplate, config: &FormexConfig) -> Self {
        let mut extraction = Self::new(template.name.clone(), template.fields.iter().cloned(), config);
        extraction.instructions = template.example_prompt.clone();
        extraction
    }

    /// Append extra fields. Duplicates are dropped by `normalized_fields`.
    pub fn with_extra_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the token budget.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Requested field names trimmed, without blanks or duplicates, in request order.
    pub fn normalized_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let field = field.trim();
            if !field.is_empty() && !fields.iter().any(|f| f == field) {
                fields.push(field.to_string());
            }
        }
        fields
    }

    /// Pre-flight check run before spending a model call.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();

        if self.form_type.trim().is_empty() {
            errors.push("form type is required".to_string());
        }
        if self.normalized_fields().is_empty() {
            errors.push("at least one extraction field is required".to_string());
        }
        if self.model.trim().is_empty() {
            errors.push("model is required".to_string());
        }
        if !TEMPERATURE_RANGE.contains(&self.temperature) {
            errors.push(format!("temperature must be between 0 and 2 (got {})", self.temperature));
        }
        if !(MIN_MAX_TOKENS..=MAX_MAX_TOKENS).contains(&self.max_tokens) {
            errors.push(format!(
                "max_tokens must be between {MIN_MAX_TOKENS} and {MAX_MAX_TOKENS} (got {})",
                self.max_tokens
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::InvalidConfig(errors))
        }
    }
}

/// An uploaded document plus how to extract from it.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    /// Raw document bytes.
    pub data: Vec<u8>,

    /// Original filename.
    pub filename: String,

    /// Extraction settings.
    pub config: ExtractionConfig,
}

impl ExtractionRequest {
    pub fn new(data: Vec<u8>, filename: impl Into<String>, config: ExtractionConfig) -> Self {
        Self {
            data,
            filename: filename.into(),
            config,
        }
    }
}

/// Outcome of a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Document snapshot at the end of the run.
    pub document: Document,

    /// One entry per requested field on success, empty on failure.
    pub fields: Vec<ExtractedField>,

    /// Wall-clock time of the run.
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,

    /// Whether the run completed.
    pub success: bool,

    /// Failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Failure category.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    /// Model output, kept for diagnostics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

impl ExtractionResult {
    /// Share of fields with a located value (0.0 - 1.0).
    pub fn found_ratio(&self) -> f32 {
        if self.fields.is_empty() {
            return 0.0;
        }
        let found = self.fields.iter().filter(|f| f.is_found()).count();
        found as f32 / self.fields.len() as f32
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&ExtractedField> {
        self.fields.iter().find(|f| f.field_name == name)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
