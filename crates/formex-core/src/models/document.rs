//! Persisted records: documents, extracted fields, and extraction templates.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel value stored for fields the model could not find.
pub const NOT_FOUND: &str = "not found";

/// Processing status of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Uploaded, not yet picked up.
    Pending,
    /// A pipeline run is in progress.
    Processing,
    /// All requested fields were stored.
    Completed,
    /// The run ended with an error.
    Failed,
}

impl DocumentStatus {
    /// Database and display name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }

    /// Whether no further transition is allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Failed)
    }

    /// Statuses only move forward: pending -> processing -> completed | failed.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (*self, next),
            (Pending, Processing) | (Pending, Failed) | (Processing, Completed) | (Processing, Failed)
        )
    }

    /// Statuses from which `self` can be reached.
    pub fn predecessors(&self) -> &'static [DocumentStatus] {
        use DocumentStatus::*;
        match self {
            Pending => &[],
            Processing => &[Pending],
            Completed => &[Processing],
            Failed => &[Pending, Processing],
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DocumentStatus::Pending),
            "processing" => Ok(DocumentStatus::Processing),
            "completed" => Ok(DocumentStatus::Completed),
            "failed" => Ok(DocumentStatus::Failed),
            other => Err(format!("unknown document status: {other}")),
        }
    }
}

/// An uploaded document and its processing state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Database ID, assigned on insert.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Original filename.
    pub filename: String,

    /// Size of the uploaded bytes.
    pub file_size: u64,

    /// Upload timestamp.
    pub uploaded_at: DateTime<Utc>,

    /// Declared form type.
    pub form_type: String,

    /// Processing status.
    pub status: DocumentStatus,

    /// Error message for failed runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Document {
    /// Create a pending document for a fresh upload.
    pub fn new(filename: impl Into<String>, file_size: u64, form_type: impl Into<String>) -> Self {
        Self {
            id: None,
            filename: filename.into(),
            file_size,
            uploaded_at: Utc::now(),
            form_type: form_type.into(),
            status: DocumentStatus::Pending,
            error_message: None,
        }
    }
}

/// One extracted value belonging to a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedField {
    /// Database ID, assigned on insert.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Owning document.
    pub document_id: i64,

    /// Requested field name.
    pub field_name: String,

    /// Extracted value, or [`NOT_FOUND`].
    pub value: String,

    /// Model confidence in [0, 1].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,

    /// Short justification from the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,

    /// Extraction timestamp.
    pub extracted_at: DateTime<Utc>,
}

impl ExtractedField {
    /// Whether the model located a value.
    pub fn is_found(&self) -> bool {
        !self.value.eq_ignore_ascii_case(NOT_FOUND)
    }
}

/// A named, reusable set of fields to extract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionTemplate {
    /// Database ID, assigned on insert.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Unique template name.
    pub name: String,

    /// Human readable description.
    pub description: String,

    /// Fields extracted by this template.
    pub fields: Vec<String>,

    /// Extra instructions passed to the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example_prompt: Option<String>,

    /// Free-form validation rules keyed by field name.
    #[serde(default)]
    pub validation_rules: BTreeMap<String, serde_json::Value>,
}

impl ExtractionTemplate {
    /// Create a template without rules or example prompt.
    pub fn new<I, S>(name: impl Into<String>, description: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: None,
            name: name.into(),
            description: description.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            example_prompt: None,
            validation_rules: BTreeMap::new(),
        }
    }

    /// Set the example prompt.
    pub fn with_example_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.example_prompt = Some(prompt.into());
        self
    }

    /// Templates installed into an empty store.
    pub fn defaults() -> Vec<ExtractionTemplate> {
        vec![
            ExtractionTemplate::new(
                "Customer Registration",
                "General customer registration forms",
                ["customer_name", "email", "phone", "address", "date_of_birth"],
            )
            .with_example_prompt("Extract customer registration information from the form"),
            ExtractionTemplate::new(
                "Insurance Claim",
                "Insurance claim forms (FNOL, property loss, etc.)",
                ["claim_number", "policy_number", "claim_type", "incident_date", "damage_description"],
            )
            .with_example_prompt("Extract insurance claim details from the form"),
            ExtractionTemplate::new(
                "Loan Application",
                "Loan and mortgage application forms",
                ["applicant_name", "loan_amount", "loan_type", "income", "employment_status"],
            )
            .with_example_prompt("Extract loan application information from the form"),
        ]
    }
}
