//! OpenAI-compatible chat-completions transport.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{ChatRequest, ChatTransport};
use crate::error::ApiError;
use crate::models::config::LlmConfig;

/// Blocking HTTP client for `{base_url}/chat/completions`.
pub struct OpenAiTransport {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OpenAiTransport {
    pub fn new(base_url: &str, api_key: Option<String>, timeout_secs: u64) -> Result<Self, ApiError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ApiError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
            timeout_secs,
        })
    }

    /// Build from configuration, resolving the API key from the environment first.
    pub fn from_config(config: &LlmConfig) -> Result<Self, ApiError> {
        Self::new(&config.base_url, config.resolve_api_key(), config.timeout_secs)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_key(&self) -> Result<&str, ApiError> {
        self.api_key.as_deref().ok_or_else(|| {
            ApiError::Auth(format!(
                "no API key configured (set {} or llm.api_key)",
                crate::models::config::API_KEY_ENV
            ))
        })
    }

    /// Only timeouts and connection failures are worth retrying.
    fn send_error(&self, e: reqwest::Error) -> ApiError {
        if e.is_timeout() {
            ApiError::Unavailable {
                status: None,
                message: format!("request timed out after {}s", self.timeout_secs),
            }
        } else if e.is_connect() {
            ApiError::Unavailable {
                status: None,
                message: format!("cannot connect to {}", self.base_url),
            }
        } else if e.is_body() || e.is_decode() {
            ApiError::MalformedResponse(format!("unreadable response body: {e}"))
        } else {
            ApiError::Config(format!("request to {} could not be sent: {e}", self.base_url))
        }
    }

    fn read_body(&self, response: reqwest::blocking::Response) -> Result<String, ApiError> {
        let status = response.status();
        let body = response.text().map_err(|e| self.send_error(e))?;

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &body));
        }
        Ok(body)
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    temperature: f32,
    max_completion_tokens: u32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ModelsResponse {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

impl ChatTransport for OpenAiTransport {
    fn send(&self, request: &ChatRequest) -> Result<String, ApiError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = CompletionRequest {
            model: &request.params.model,
            messages: [
                Message {
                    role: "system",
                    content: &request.system,
                },
                Message {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: request.params.temperature,
            max_completion_tokens: request.params.max_tokens,
        };

        debug!(
            "POST {} (model={}, prompt={} chars)",
            url,
            request.params.model,
            request.prompt.len()
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key()?)
            .json(&body)
            .send()
            .map_err(|e| self.send_error(e))?;

        let body = self.read_body(response)?;
        trace!("Completion response: {}", body);
        parse_completion(&body)
    }

    fn list_models(&self) -> Result<Vec<String>, ApiError> {
        let url = format!("{}/models", self.base_url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(self.api_key()?)
            .send()
            .map_err(|e| self.send_error(e))?;

        let body = self.read_body(response)?;
        let parsed: ModelsResponse =
            serde_json::from_str(&body).map_err(|e| ApiError::MalformedResponse(e.to_string()))?;

        let mut models: Vec<String> = parsed.data.into_iter().map(|m| m.id).collect();
        models.sort();
        Ok(models)
    }
}

/// Assistant text of the first choice.
fn parse_completion(body: &str) -> Result<String, ApiError> {
    let parsed: CompletionResponse =
        serde_json::from_str(body).map_err(|e| ApiError::MalformedResponse(e.to_string()))?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ApiError::MalformedResponse("response has no message content".to_string()))
}

/// Map a non-success HTTP status and body to an error.
fn classify_status(status: u16, body: &str) -> ApiError {
    let envelope = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let message = envelope
        .as_ref()
        .map(|e| e.error.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.trim().to_string());
    let quota = envelope.as_ref().is_some_and(|e| {
        e.error.code.as_deref() == Some("insufficient_quota")
            || e.error.kind.as_deref() == Some("insufficient_quota")
    });

    match status {
        401 | 403 => ApiError::Auth(message),
        429 if quota => ApiError::QuotaExceeded(message),
        429 => ApiError::RateLimited(message),
        408 | 409 | 500..=599 => ApiError::Unavailable {
            status: Some(status),
            message,
        },
        _ => ApiError::InvalidRequest {
            status,
            body: message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ModelParams;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_completion() {
        let body = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"{\"extracted_data\":{}}"}}]}"#;
        assert_eq!(parse_completion(body).unwrap(), r#"{"extracted_data":{}}"#);
    }

    #[test]
    fn test_parse_completion_without_content() {
        let err = parse_completion(r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, ApiError::MalformedResponse(_)));

        let err = parse_completion(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap_err();
        assert!(matches!(err, ApiError::MalformedResponse(_)));

        let err = parse_completion("<html>").unwrap_err();
        assert!(matches!(err, ApiError::MalformedResponse(_)));
    }

    #[test]
    fn test_classify_rate_limit_and_quota() {
        let body = r#"{"error":{"message":"Rate limit reached","type":"requests","code":"rate_limit_exceeded"}}"#;
        assert_eq!(
            classify_status(429, body),
            ApiError::RateLimited("Rate limit reached".to_string())
        );

        let body = r#"{"error":{"message":"You exceeded your current quota","type":"insufficient_quota","code":"insufficient_quota"}}"#;
        let err = classify_status(429, body);
        assert!(matches!(err, ApiError::QuotaExceeded(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_classify_statuses() {
        assert!(matches!(classify_status(401, "{}"), ApiError::Auth(_)));
        assert!(matches!(classify_status(403, ""), ApiError::Auth(_)));
        assert!(classify_status(500, "oops").is_transient());
        assert!(classify_status(503, "").is_transient());
        assert!(classify_status(408, "").is_transient());
        assert_eq!(
            classify_status(400, "bad model"),
            ApiError::InvalidRequest {
                status: 400,
                body: "bad model".to_string()
            }
        );
        assert!(!classify_status(404, "").is_transient());
    }

    #[test]
    fn test_request_body_uses_completion_token_name() {
        let body = CompletionRequest {
            model: "gpt-5-nano",
            messages: [
                Message {
                    role: "system",
                    content: "sys",
                },
                Message {
                    role: "user",
                    content: "hi",
                },
            ],
            temperature: 0.5,
            max_completion_tokens: 1000,
        };
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["max_completion_tokens"], 1000);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
    }

    #[test]
    fn test_unbuildable_request_is_not_retried() {
        let transport = OpenAiTransport::new("not a url", Some("key".to_string()), 5).unwrap();
        let params = ModelParams {
            model: "gpt-5-nano".to_string(),
            temperature: 0.1,
            max_tokens: 1000,
        };
        let request = ChatRequest::new("sys", "prompt", params);

        let err = transport.send(&request).unwrap_err();
        assert!(matches!(err, ApiError::Config(_)), "got {err:?}");
        assert!(!err.is_transient());

        let err = transport.list_models().unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_missing_api_key_is_auth_error() {
        let transport = OpenAiTransport::new("http://localhost:1/", None, 5).unwrap();
        assert_eq!(transport.base_url(), "http://localhost:1");
        assert!(matches!(transport.api_key(), Err(ApiError::Auth(_))));
    }
}
