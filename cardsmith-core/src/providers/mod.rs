//! Chat backends behind the Generator and Scorer roles.
//!
//! A [`ChatBackend`] performs one structured completion: system text, user
//! text, and a JSON schema in; JSON text out. [`llm`] turns that into the
//! typed roles, and [`openai_compat`] talks to any endpoint that follows the
//! OpenAI chat completions API (OpenAI, Azure, Ollama, vLLM, LM Studio).
//!
//! Use `create_backend()` to instantiate the backend from config.

pub mod llm;
pub mod openai_compat;

use crate::config::{LlmConfig, RetryConfig};
use crate::error::BackendError;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use llm::{LlmGenerator, LlmInstructionProposer, LlmRoles, LlmScorer, create_roles};
pub use openai_compat::OpenAiCompatibleBackend;

/// One structured-completion call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredRequest {
    /// Name of the response schema, e.g. "critique".
    pub schema_name: String,
    /// JSON schema the response must satisfy.
    pub schema: serde_json::Value,
    pub system: String,
    pub user: String,
}

impl StructuredRequest {
    pub fn new(
        schema_name: impl Into<String>,
        schema: serde_json::Value,
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            schema_name: schema_name.into(),
            schema,
            system: system.into(),
            user: user.into(),
        }
    }
}

/// A model endpoint that returns JSON matching a requested schema.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Return the raw JSON text of the model's answer.
    async fn complete_structured(&self, request: StructuredRequest) -> Result<String, BackendError>;

    /// Return the model name.
    fn model_name(&self) -> &str;
}

/// Execute an async operation with exponential backoff retry on transient errors.
///
/// Retries on `RateLimited` (respects `retry_after_secs`) and `Unavailable`.
/// Permanent errors (auth, malformed output, client errors) return immediately.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, BackendError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) if is_retryable(&e) && attempt < config.max_retries => {
                let backoff_ms = compute_backoff(config, attempt, &e);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_retryable(err: &BackendError) -> bool {
    matches!(
        err,
        BackendError::RateLimited { .. } | BackendError::Unavailable { .. }
    )
}

/// Backoff delay, respecting the server's retry-after when rate limited.
fn compute_backoff(config: &RetryConfig, attempt: u32, err: &BackendError) -> u64 {
    let computed = compute_exponential_backoff(config, attempt);
    if let BackendError::RateLimited { retry_after_secs } = err {
        return (retry_after_secs * 1000).max(computed);
    }
    computed
}

fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        // Up to 25% jitter
        let jitter = (capped as f64 * 0.25 * rand::thread_rng().gen_range(0.0..1.0)) as u64;
        capped + jitter
    } else {
        capped
    }
}

/// Create a chat backend based on the configuration.
///
/// Every supported provider ("openai", "ollama", "local", ...) speaks the
/// OpenAI chat completions format, so they all route to
/// [`OpenAiCompatibleBackend`].
pub fn create_backend(config: &LlmConfig) -> Result<Arc<dyn ChatBackend>, BackendError> {
    tracing::debug!(provider = %config.provider, model = %config.model, "Creating chat backend");
    Ok(Arc::new(OpenAiCompatibleBackend::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_create_backend_local_needs_no_key() {
        let config = LlmConfig {
            provider: "ollama".to_string(),
            model: "llama3.1:8b".to_string(),
            api_key_env: "CARDSMITH_TEST_UNSET_KEY".to_string(),
            base_url: Some("http://localhost:11434/v1".to_string()),
            ..LlmConfig::default()
        };
        let backend = create_backend(&config).unwrap();
        assert_eq!(backend.model_name(), "llama3.1:8b");
    }

    #[test]
    fn test_create_backend_missing_key() {
        let config = LlmConfig {
            api_key_env: "CARDSMITH_NONEXISTENT_KEY".to_string(),
            ..LlmConfig::default()
        };
        match create_backend(&config) {
            Err(BackendError::AuthFailed { provider }) => {
                assert!(provider.contains("CARDSMITH_NONEXISTENT_KEY"));
            }
            Err(other) => panic!("Expected AuthFailed, got {:?}", other),
            Ok(_) => panic!("Expected AuthFailed, got a backend"),
        }
    }

    #[test]
    fn test_exponential_backoff_caps() {
        let config = RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        };
        assert_eq!(compute_exponential_backoff(&config, 0), 1000);
        assert_eq!(compute_exponential_backoff(&config, 2), 4000);
        assert_eq!(compute_exponential_backoff(&config, 10), 30_000);
    }

    #[test]
    fn test_backoff_respects_retry_after() {
        let config = RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        };
        let err = BackendError::RateLimited {
            retry_after_secs: 20,
        };
        assert_eq!(compute_backoff(&config, 0, &err), 20_000);
    }

    #[tokio::test]
    async fn test_with_retry_retries_transient() {
        let calls = AtomicUsize::new(0);
        let result = with_retry(&fast_retry(), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(BackendError::Unavailable {
                    message: "503".into(),
                })
            } else {
                Ok("ok")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_stops_on_permanent_error() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = with_retry(&fast_retry(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::AuthFailed {
                provider: "test".into(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
