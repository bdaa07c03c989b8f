//! Language model access.
//!
//! A [`ChatTransport`] makes one call against a chat-completions API. A
//! [`LanguageModel`] is what the pipeline talks to; [`RetryingClient`] turns
//! any transport into one by adding bounded exponential backoff.

mod openai;
mod retry;

pub use openai::OpenAiTransport;
pub use retry::{RetryPolicy, RetryingClient, Sleeper, ThreadSleeper};

use serde::{Deserialize, Serialize};

use crate::error::{ApiError, LlmError};
use crate::models::config::LlmConfig;
use crate::models::ExtractionConfig;

/// Call-scoped model settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl From<&ExtractionConfig> for ModelParams {
    fn from(config: &ExtractionConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// One system instruction plus one user prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub system: String,
    pub prompt: String,
    pub params: ModelParams,
}

impl ChatRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>, params: ModelParams) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            params,
        }
    }
}

/// A single, unretried call against a chat API.
pub trait ChatTransport: Send + Sync {
    /// Send the request and return the assistant message text.
    fn send(&self, request: &ChatRequest) -> Result<String, ApiError>;

    /// Model ids the API offers.
    fn list_models(&self) -> Result<Vec<String>, ApiError>;
}

/// The model as seen by the extraction pipeline.
pub trait LanguageModel: Send + Sync {
    /// Complete a chat request, failing only once retries are spent.
    fn complete(&self, request: &ChatRequest) -> Result<String, LlmError>;

    /// Model ids available to this client.
    fn list_models(&self) -> Result<Vec<String>, LlmError>;
}

/// OpenAI-compatible client with the configured retry policy.
pub fn openai_client(config: &LlmConfig) -> Result<RetryingClient<OpenAiTransport>, ApiError> {
    let transport = OpenAiTransport::from_config(config)?;
    Ok(RetryingClient::new(transport, RetryPolicy::from(config)))
}
