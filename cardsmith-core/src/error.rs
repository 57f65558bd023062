//! Error types for the Cardsmith engine.
//!
//! Uses `thiserror` for public API error types. Backend failures (malformed
//! model output, transport problems) are kept separate from precondition
//! failures so the engine can absorb the former locally and surface the latter.

/// Top-level error type for the Cardsmith core library.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Incomplete input: {message}")]
    IncompleteInput { message: String },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Optimizer error: {0}")]
    Optimizer(#[from] OptimizerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn incomplete(message: impl Into<String>) -> Self {
        Self::IncompleteInput {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

/// Errors from a Generator, Scorer, or the chat backend behind them.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("Malformed {role} output: {message}")]
    MalformedOutput { role: String, message: String },

    #[error("API request failed: {message}")]
    Request { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Backend unavailable: {message}")]
    Unavailable { message: String },
}

impl BackendError {
    pub fn malformed(role: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedOutput {
            role: role.into(),
            message: message.into(),
        }
    }

    /// Whether the failure came from the shape of the output rather than transport.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedOutput { .. })
    }
}

/// Errors raised inside the prompt search.
#[derive(Debug, thiserror::Error)]
pub enum OptimizerError {
    #[error("Search strategy '{strategy}' unavailable: {reason}")]
    StrategyUnavailable { strategy: String, reason: String },

    #[error("No evaluation examples usable for role '{role}'")]
    NoCompatibleExamples { role: String },

    #[error("Every search strategy failed; last error: {message}")]
    Exhausted { message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::ParseError {
            message: err.to_string(),
        }
    }
}

/// Convenience result alias for the engine.
pub type Result<T> = std::result::Result<T, EngineError>;
