//! Error types for the formex-core library.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the formex library.
#[derive(Error, Debug)]
pub enum FormexError {
    /// Input rejected before any model call.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// PDF processing error.
    #[error("extraction error: {0}")]
    Pdf(#[from] PdfError),

    /// Model call failed.
    #[error("model error: {0}")]
    Llm(#[from] LlmError),

    /// Model response could not be turned into fields.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Persistence store failure.
    #[error("persistence error: {0}")]
    Store(#[from] StoreError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Unexpected fault caught by the orchestrator.
    #[error("unexpected error during processing: {0}")]
    Internal(String),
}

impl FormexError {
    /// Category reported alongside a failed run.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FormexError::Validation(_) | FormexError::Config(_) => ErrorKind::Validation,
            FormexError::Pdf(_) | FormexError::Io(_) => ErrorKind::Extraction,
            FormexError::Llm(_) => ErrorKind::Model,
            FormexError::Parse(_) => ErrorKind::Parse,
            FormexError::Store(_) => ErrorKind::Persistence,
            FormexError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Coarse failure category of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Extraction,
    Model,
    Parse,
    Persistence,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Extraction => "extraction",
            ErrorKind::Model => "model",
            ErrorKind::Parse => "parse",
            ErrorKind::Persistence => "persistence",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Errors raised while checking input before any model call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Document is at or below the minimum size.
    #[error("document is too small ({size} bytes, must be larger than {min} bytes)")]
    TooSmall { size: u64, min: u64 },

    /// Document is at or above the maximum size.
    #[error("document is too large ({size} bytes, must be smaller than {max} bytes)")]
    TooLarge { size: u64, max: u64 },

    /// Unsupported file type.
    #[error("unsupported file type: {0}")]
    UnsupportedFile(String),

    /// Extraction configuration is out of range.
    #[error("invalid extraction config: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),
}

/// Errors related to PDF processing.
#[derive(Error, Debug)]
pub enum PdfError {
    /// Failed to open/parse the PDF file.
    #[error("failed to parse PDF: {0}")]
    Parse(String),

    /// The PDF is encrypted and cannot be processed.
    #[error("PDF is encrypted")]
    Encrypted,

    /// The PDF is empty or has no pages.
    #[error("PDF file appears to be empty or corrupted (no pages)")]
    NoPages,

    /// Every page was read but no text came out.
    #[error("no text content could be extracted from PDF")]
    NoText,

    /// A single page could not be read.
    #[error("failed to read page {page}: {reason}")]
    Page { page: u32, reason: String },

    /// I/O error while reading a document from disk.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the LLM client after its retry policy has run.
#[derive(Error, Debug)]
pub enum LlmError {
    /// Rate limited on every attempt.
    #[error("rate limit exceeded after {attempts} attempts: {message}")]
    RateLimitExhausted { attempts: u32, message: String },

    /// Transient failures on every attempt.
    #[error("model call failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: ApiError,
    },

    /// Non-transient API failure, not retried.
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl LlmError {
    /// Number of attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            LlmError::RateLimitExhausted { attempts, .. } => *attempts,
            LlmError::RetriesExhausted { attempts, .. } => *attempts,
            LlmError::Api(_) => 1,
        }
    }

    /// Whether the final failure was rate limiting.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, LlmError::RateLimitExhausted { .. })
    }
}

/// A single failed call against the chat-completions API.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// HTTP 429 without a quota code.
    #[error("rate limited (status 429): {0}")]
    RateLimited(String),

    /// Server-side or network failure that may succeed on retry.
    #[error("service unavailable{}: {message}", status_suffix(.status))]
    Unavailable { status: Option<u16>, message: String },

    /// Credentials missing or rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The account has no quota left.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The API rejected the request itself.
    #[error("invalid request (status {status}): {body}")]
    InvalidRequest { status: u16, body: String },

    /// Response arrived but did not have the expected shape.
    #[error("malformed API response: {0}")]
    MalformedResponse(String),

    /// Client could not be set up.
    #[error("client configuration error: {0}")]
    Config(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

impl ApiError {
    /// Transient failures are retried with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::RateLimited(_) | ApiError::Unavailable { .. })
    }
}

/// Errors from the response parser.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// No `{ ... }` span in the model output.
    #[error("no JSON content found in response")]
    NoJson { raw: String },

    /// The span could not be decoded as JSON.
    #[error("invalid JSON response: {message}")]
    Decode { message: String, raw: String },

    /// Decoded JSON lacks the `extracted_data` object.
    #[error("response missing 'extracted_data' object")]
    MissingExtractedData { raw: String },
}

impl ParseError {
    /// Raw model output kept for diagnostics.
    pub fn raw(&self) -> &str {
        match self {
            ParseError::NoJson { raw }
            | ParseError::Decode { raw, .. }
            | ParseError::MissingExtractedData { raw } => raw,
        }
    }
}

/// Errors from the persistence store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite failure.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// No row with this id.
    #[error("document {0} not found")]
    NotFound(i64),

    /// Status change would move a document backwards.
    #[error("document {id} cannot move from {from} to {to}")]
    InvalidTransition { id: i64, from: String, to: String },

    /// A template with this name already exists.
    #[error("template '{0}' already exists")]
    DuplicateTemplate(String),

    /// Template content cannot be stored.
    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    /// Stored value could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Connection lock poisoned by a panicking writer.
    #[error("store lock poisoned")]
    Poisoned,

    /// I/O error while preparing the database location.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for the formex library.
pub type Result<T> = std::result::Result<T, FormexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        let err: FormexError = PdfError::NoPages.into();
        assert_eq!(err.kind(), ErrorKind::Extraction);
        assert!(err.to_string().contains("empty or corrupted"));

        let err: FormexError = ValidationError::TooSmall { size: 50, min: 100 }.into();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("too small"));

        let err: FormexError = LlmError::RateLimitExhausted {
            attempts: 4,
            message: "slow down".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Model);
    }

    #[test]
    fn test_api_error_transience() {
        assert!(ApiError::RateLimited(String::new()).is_transient());
        assert!(
            ApiError::Unavailable {
                status: Some(503),
                message: "busy".to_string()
            }
            .is_transient()
        );
        assert!(!ApiError::Auth("bad key".to_string()).is_transient());
        assert!(!ApiError::QuotaExceeded(String::new()).is_transient());
        assert!(
            !ApiError::InvalidRequest {
                status: 400,
                body: String::new()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_unavailable_message_includes_status() {
        let err = ApiError::Unavailable {
            status: Some(502),
            message: "bad gateway".to_string(),
        };
        assert_eq!(err.to_string(), "service unavailable (status 502): bad gateway");

        let err = ApiError::Unavailable {
            status: None,
            message: "timed out".to_string(),
        };
        assert_eq!(err.to_string(), "service unavailable: timed out");
    }

    #[test]
    fn test_invalid_config_joins_problems() {
        let err = ValidationError::InvalidConfig(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(err.to_string(), "invalid extraction config: a; b");
    }
}
