//! OpenAI-compatible chat backend.
//!
//! Supports OpenAI, Azure OpenAI, Ollama, vLLM, LM Studio, and any
//! endpoint that follows the OpenAI chat completions API format. Responses
//! are requested with `response_format = json_schema` in strict mode.

use crate::config::{LlmConfig, RetryConfig};
use crate::error::BackendError;
use crate::providers::{ChatBackend, StructuredRequest, with_retry};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// Provider label used in error messages.
const PROVIDER: &str = "OpenAI-compatible";

/// OpenAI-compatible structured-completion backend.
pub struct OpenAiCompatibleBackend {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
    retry: RetryConfig,
}

impl OpenAiCompatibleBackend {
    /// Create a new backend from configuration.
    ///
    /// The API key comes from [`LlmConfig::api_key`].
    pub fn new(config: &LlmConfig) -> Result<Self, BackendError> {
        let api_key = config.api_key().map_err(|e| BackendError::AuthFailed {
            provider: format!("{PROVIDER}: {e}"),
        })?;
        Self::new_with_key(config, api_key)
    }

    /// Create a new backend with an explicitly provided API key.
    pub fn new_with_key(config: &LlmConfig, api_key: String) -> Result<Self, BackendError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
            .trim_end_matches('/')
            .to_string();

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BackendError::Request {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url,
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            retry: config.retry.clone(),
        })
    }

    /// Build the chat completions request body.
    fn request_body(&self, request: &StructuredRequest) -> Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema_name,
                    "schema": request.schema,
                    "strict": true,
                }
            },
            "stream": false,
        })
    }

    /// Extract the JSON answer text from an OpenAI-format response body.
    fn parse_response(body: &Value, schema_name: &str) -> Result<String, BackendError> {
        let choice = body
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| BackendError::malformed(schema_name, "No choices in response"))?;

        let message = choice
            .get("message")
            .ok_or_else(|| BackendError::malformed(schema_name, "No message in choice"))?;

        if let Some(refusal) = message.get("refusal").and_then(|r| r.as_str()) {
            return Err(BackendError::malformed(
                schema_name,
                format!("Model refused: {}", refusal),
            ));
        }

        if choice.get("finish_reason").and_then(|f| f.as_str()) == Some("length") {
            return Err(BackendError::malformed(
                schema_name,
                "Response truncated at max_tokens",
            ));
        }

        if let Some(usage) = body.get("usage") {
            debug!(
                schema = schema_name,
                input_tokens = usage.get("prompt_tokens").and_then(|t| t.as_u64()).unwrap_or(0),
                output_tokens = usage
                    .get("completion_tokens")
                    .and_then(|t| t.as_u64())
                    .unwrap_or(0),
                "Structured completion usage"
            );
        }

        message
            .get("content")
            .and_then(|c| c.as_str())
            .filter(|c| !c.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| BackendError::malformed(schema_name, "Empty message content"))
    }

    /// Map HTTP status codes to backend errors.
    fn map_http_error(status: reqwest::StatusCode, body: &str) -> BackendError {
        match status.as_u16() {
            401 => {
                debug!(body = %body, "Authentication failed (401)");
                BackendError::AuthFailed {
                    provider: PROVIDER.to_string(),
                }
            }
            429 => {
                // "Rate limit reached ... Please try again in 7s."
                let retry_secs = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| {
                        v.get("error")?
                            .get("message")?
                            .as_str()
                            .map(|s| s.to_string())
                    })
                    .and_then(|msg| {
                        msg.split("in ")
                            .last()
                            .map(|s| s.trim_end_matches('.').trim_end_matches('s').to_string())
                            .and_then(|s| s.parse::<u64>().ok())
                    })
                    .unwrap_or(5);
                BackendError::RateLimited {
                    retry_after_secs: retry_secs,
                }
            }
            status if status >= 500 => BackendError::Unavailable {
                message: format!("Server error ({}): {}", status, body),
            },
            _ => BackendError::Request {
                message: format!("HTTP {}: {}", status, body),
            },
        }
    }

    async fn send_once(&self, request: &StructuredRequest) -> Result<String, BackendError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(request);

        debug!(url = %url, model = %self.model, schema = %request.schema_name, "Sending structured completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    BackendError::Unavailable {
                        message: format!("Request failed: {}", e),
                    }
                } else {
                    BackendError::Request {
                        message: format!("Request failed: {}", e),
                    }
                }
            })?;

        let status = response.status();
        let response_body = response.text().await.map_err(|e| BackendError::Request {
            message: format!("Failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &response_body));
        }

        let json: Value = serde_json::from_str(&response_body).map_err(|e| {
            BackendError::malformed(&request.schema_name, format!("Invalid JSON: {}", e))
        })?;

        Self::parse_response(&json, &request.schema_name)
    }
}

#[async_trait]
impl ChatBackend for OpenAiCompatibleBackend {
    async fn complete_structured(&self, request: StructuredRequest) -> Result<String, BackendError> {
        with_retry(&self.retry, || self.send_once(&request)).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
