//! Configuration structures for the extraction pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable that overrides `llm.api_key`.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Smallest accepted token budget.
pub const MIN_MAX_TOKENS: u32 = 100;

/// Largest accepted token budget.
pub const MAX_MAX_TOKENS: u32 = 4000;

/// Accepted temperature range.
pub const TEMPERATURE_RANGE: std::ops::RangeInclusive<f32> = 0.0..=2.0;

/// Main configuration for formex.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FormexConfig {
    /// Model API configuration.
    pub llm: LlmConfig,

    /// Extraction defaults.
    pub extraction: ExtractionDefaults,

    /// PDF limits.
    pub pdf: PdfConfig,

    /// Storage configuration.
    pub storage: StorageConfig,
}

/// Chat-completions API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API base URL (OpenAI-compatible).
    pub base_url: String,

    /// API key. `OPENAI_API_KEY` wins when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model used when a request does not name one.
    pub default_model: String,

    /// Per-call network timeout in seconds.
    pub timeout_secs: u64,

    /// Retries after the first attempt on transient failures.
    pub max_retries: u32,

    /// Base backoff delay in milliseconds, doubled per retry.
    pub retry_base_delay_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            default_model: "gpt-5-nano".to_string(),
            timeout_secs: 120,
            max_retries: 3,
            retry_base_delay_ms: 1000,
        }
    }
}

impl LlmConfig {
    /// API key from the environment, falling back to the config file.
    pub fn resolve_api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| self.api_key.clone().filter(|key| !key.trim().is_empty()))
    }
}

/// Defaults applied to extraction requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionDefaults {
    /// Sampling temperature (0.0 - 2.0).
    pub default_temperature: f32,

    /// Completion token budget.
    pub default_max_tokens: u32,

    /// Maximum characters of document text placed in the prompt.
    pub prompt_char_budget: usize,
}

impl Default for ExtractionDefaults {
    fn default() -> Self {
        Self {
            default_temperature: 0.1,
            default_max_tokens: 1000,
            prompt_char_budget: 8000,
        }
    }
}

/// PDF size limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfConfig {
    /// Documents must be larger than this.
    pub min_size_bytes: u64,

    /// Documents must be smaller than this.
    pub max_size_bytes: u64,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            min_size_bytes: 100,
            max_size_bytes: 50 * 1024 * 1024,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file.
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/formex.db"),
        }
    }
}

impl FormexConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;
        std::fs::write(path, content)
    }

    /// Check every value, returning all problems found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.llm.base_url.trim().is_empty() {
            errors.push("llm.base_url must not be empty".to_string());
        }
        if self.llm.default_model.trim().is_empty() {
            errors.push("llm.default_model must not be empty".to_string());
        }
        if self.llm.timeout_secs == 0 {
            errors.push("llm.timeout_secs must be positive".to_string());
        }
        if self.llm.max_retries > 10 {
            errors.push("llm.max_retries must be at most 10".to_string());
        }
        if !TEMPERATURE_RANGE.contains(&self.extraction.default_temperature) {
            errors.push("extraction.default_temperature must be between 0 and 2".to_string());
        }
        if !(MIN_MAX_TOKENS..=MAX_MAX_TOKENS).contains(&self.extraction.default_max_tokens) {
            errors.push(format!(
                "extraction.default_max_tokens must be between {MIN_MAX_TOKENS} and {MAX_MAX_TOKENS}"
            ));
        }
        if self.extraction.prompt_char_budget == 0 {
            errors.push("extraction.prompt_char_budget must be positive".to_string());
        }
        if self.pdf.min_size_bytes >= self.pdf.max_size_bytes {
            errors.push("pdf.min_size_bytes must be below pdf.max_size_bytes".to_string());
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}
