//! PDF processing module.

mod extractor;
mod layout;

pub use extractor::PdfExtractor;
pub use layout::{TextBlock, assemble_reading_order};

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PdfError, ValidationError};
use crate::models::config::PdfConfig;

/// Result type for PDF operations.
pub type Result<T> = std::result::Result<T, PdfError>;

/// Text recovered from a document, page by page.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedText {
    /// Full text with a `--- Page N ---` marker before each page.
    pub text: String,
    /// Pages that produced text.
    pub pages: Vec<PdfPage>,
    /// Pages that failed to read and were skipped.
    pub skipped_pages: Vec<u32>,
    /// Total pages in the document.
    pub page_count: u32,
}

impl ExtractedText {
    /// Build the marked-up text from page contents.
    pub fn from_pages(pages: Vec<PdfPage>, skipped_pages: Vec<u32>, page_count: u32) -> Self {
        let text = pages
            .iter()
            .map(|p| format!("{}\n{}", page_marker(p.number), p.text))
            .collect::<Vec<_>>()
            .join("\n\n");

        Self {
            text,
            pages,
            skipped_pages,
            page_count,
        }
    }
}

/// Content from a single PDF page.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfPage {
    /// Page number (1-indexed).
    pub number: u32,
    /// Extracted text from this page, in reading order.
    pub text: String,
}

/// Basic facts about a document, for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfInfo {
    /// Number of pages.
    pub page_count: u32,
    /// Size in bytes.
    pub size: u64,
    /// Document information dictionary (Title, Author, ...).
    pub metadata: BTreeMap<String, String>,
}

/// Marker placed before each page's text.
pub fn page_marker(number: u32) -> String {
    format!("--- Page {number} ---")
}

/// Size bounds applied before any parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimits {
    /// Documents must be larger than this.
    pub min_bytes: u64,
    /// Documents must be smaller than this.
    pub max_bytes: u64,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self::from(&PdfConfig::default())
    }
}

impl From<&PdfConfig> for SizeLimits {
    fn from(config: &PdfConfig) -> Self {
        Self {
            min_bytes: config.min_size_bytes,
            max_bytes: config.max_size_bytes,
        }
    }
}

impl SizeLimits {
    /// Accept sizes strictly between the bounds.
    pub fn check(&self, size: u64) -> std::result::Result<(), ValidationError> {
        if size <= self.min_bytes {
            return Err(ValidationError::TooSmall {
                size,
                min: self.min_bytes,
            });
        }
        if size >= self.max_bytes {
            return Err(ValidationError::TooLarge {
                size,
                max: self.max_bytes,
            });
        }
        Ok(())
    }
}

/// Check document size with the default limits.
pub fn validate(data: &[u8]) -> std::result::Result<(), ValidationError> {
    SizeLimits::default().check(data.len() as u64)
}

/// Whether the filename has a supported extension.
pub fn is_supported_file(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Trait for document text extraction.
pub trait TextExtractor: Send + Sync {
    /// Extract page-marked text from document bytes.
    fn extract(&self, data: &[u8]) -> Result<ExtractedText>;

    /// Page count, size and metadata.
    fn info(&self, data: &[u8]) -> Result<PdfInfo>;

    /// Cheap size check run before parsing.
    fn validate(&self, data: &[u8]) -> std::result::Result<(), ValidationError> {
        validate(data)
    }

    /// Extract text from a file on disk.
    fn extract_file(&self, path: &Path) -> Result<ExtractedText> {
        let data = std::fs::read(path)?;
        self.extract(&data)
    }
}
