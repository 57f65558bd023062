//! Configuration system for Cardsmith.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from the user config dir (`config.toml`) and/or
//! `.cardsmith/config.toml` in the workspace directory.

use crate::convergence::ReturnPolicy;
use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardsmithConfig {
    pub llm: LlmConfig,
    pub convergence: ConvergenceConfig,
    pub personalization: PersonalizationConfig,
    pub optimizer: OptimizerConfig,
    pub prompts: PromptsConfig,
}

impl CardsmithConfig {
    /// Collect warnings from every section, prefixed by section name.
    pub fn validate(&self) -> Vec<String> {
        let sections = [
            ("llm", self.llm.validate()),
            ("convergence", self.convergence.validate()),
            ("personalization", self.personalization.validate()),
            ("optimizer", self.optimizer.validate()),
        ];
        sections
            .into_iter()
            .flat_map(|(name, warnings)| warnings.into_iter().map(move |w| format!("[{name}] {w}")))
            .collect()
    }
}

/// Language-model backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: "openai", "ollama", "local". All speak the OpenAI chat API.
    pub provider: String,
    /// Model identifier (e.g., "gpt-4o").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Default temperature for generation.
    pub temperature: f32,
    /// Per-request timeout.
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            max_tokens: 4096,
            temperature: 0.7,
            timeout_secs: 120,
            retry: RetryConfig::default(),
        }
    }
}

impl LlmConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.temperature < 0.0 || self.temperature > 2.0 {
            warnings.push(format!(
                "temperature ({}) is outside the typical range 0.0-2.0",
                self.temperature
            ));
        }
        if self.timeout_secs == 0 {
            warnings.push("timeout_secs is 0; every request will time out".to_string());
        }
        if self.max_tokens == 0 {
            warnings.push("max_tokens is 0; the model cannot answer".to_string());
        }
        warnings
    }

    /// Whether the endpoint is a local server that needs no API key.
    pub fn is_local(&self) -> bool {
        self.base_url
            .as_deref()
            .map(|u| u.contains("localhost") || u.contains("127.0.0.1"))
            .unwrap_or(false)
    }

    /// API key from the variable named by `api_key_env`. Local servers do not
    /// check the bearer token, so they get a placeholder.
    pub fn api_key(&self) -> Result<String, ConfigError> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ if self.is_local() => {
                debug!("No API key set for local provider; using dummy bearer token");
                Ok("ollama".to_string())
            }
            _ => Err(ConfigError::EnvVarMissing {
                var: self.api_key_env.clone(),
            }),
        }
    }
}

/// Backoff policy for transient transport errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Critique/revise loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceConfig {
    /// Iteration budget; must be at least 1.
    pub max_iterations: usize,
    /// Which set to return when the budget runs out.
    pub return_policy: ReturnPolicy,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            return_policy: ReturnPolicy::BestSoFar,
        }
    }
}

impl ConvergenceConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.max_iterations == 0 {
            warnings.push("max_iterations is 0; improvement runs will be rejected".to_string());
        }
        if self.max_iterations > 10 {
            warnings.push(format!(
                "max_iterations is {}; each iteration costs at least three model calls",
                self.max_iterations
            ));
        }
        warnings
    }
}

/// Study-session adaptation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalizationConfig {
    /// Generate gap cards for weak areas as well as critical gaps.
    pub include_weak_areas: bool,
    /// Source text longer than this is truncated before gap-card generation.
    pub source_excerpt_chars: usize,
}

impl Default for PersonalizationConfig {
    fn default() -> Self {
        Self {
            include_weak_areas: true,
            source_excerpt_chars: 5000,
        }
    }
}

impl PersonalizationConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.source_excerpt_chars == 0 {
            warnings.push(
                "source_excerpt_chars is 0; gap cards will be generated without source material"
                    .to_string(),
            );
        }
        warnings
    }
}

/// Prompt search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Candidate configurations evaluated per role.
    pub num_candidates: usize,
    /// Examples each candidate is evaluated on.
    pub max_examples: usize,
    /// Demos kept by the bootstrap fallback.
    pub max_bootstrapped_demos: usize,
    /// Demos attached to each guided-search candidate.
    pub demos_per_candidate: usize,
    /// Seed for demo sampling.
    pub seed: u64,
    /// Directory of recorded runs used as evaluation examples.
    pub eval_data_dir: PathBuf,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            num_candidates: 10,
            max_examples: 20,
            max_bootstrapped_demos: 4,
            demos_per_candidate: 2,
            seed: 42,
            eval_data_dir: PathBuf::from("evaluation_data"),
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.num_candidates == 0 || self.max_examples == 0 {
            warnings.push("num_candidates and max_examples must both be at least 1".to_string());
        }
        let budget = self.num_candidates.saturating_mul(self.max_examples);
        if budget > 500 {
            warnings.push(format!(
                "search budget of {budget} evaluations is large; expect a long, costly run"
            ));
        }
        warnings
    }
}

/// Which prompt configurations the engine runs with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptsConfig {
    /// Load optimized configurations from `dir` when present.
    pub use_optimized: bool,
    pub dir: PathBuf,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            use_optimized: false,
            dir: PathBuf::from("optimized_prompts"),
        }
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "cardsmith", "cardsmith")
}

/// Path of the user-level config file, if a home directory is known.
pub fn user_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Directory for logs and other per-user data.
pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}

/// Load configuration with layered sources.
///
/// Order (later wins): defaults, user config, workspace config,
/// `CARDSMITH_` environment variables, explicit overrides.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&CardsmithConfig>,
) -> Result<CardsmithConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(CardsmithConfig::default()));

    if let Some(user_config) = user_config_path()
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(&user_config));
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".cardsmith").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // CARDSMITH_LLM__MODEL, CARDSMITH_CONVERGENCE__MAX_ITERATIONS, etc.
    figment = figment.merge(Env::prefixed("CARDSMITH_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    Ok(figment.extract()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = CardsmithConfig::default();
        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.convergence.max_iterations, 3);
        assert_eq!(config.convergence.return_policy, ReturnPolicy::BestSoFar);
        assert!(config.personalization.include_weak_areas);
        assert_eq!(config.personalization.source_excerpt_chars, 5000);
        assert_eq!(config.optimizer.max_bootstrapped_demos, 4);
        assert!(!config.prompts.use_optimized);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = CardsmithConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: CardsmithConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized.llm.model, config.llm.model);
        assert_eq!(
            deserialized.convergence.return_policy,
            config.convergence.return_policy
        );
        assert_eq!(deserialized.optimizer.seed, config.optimizer.seed);
    }

    #[test]
    fn test_load_config_with_overrides() {
        let mut overrides = CardsmithConfig::default();
        overrides.llm.model = "gpt-4o-mini".to_string();
        overrides.convergence.max_iterations = 5;

        let config = load_config(None, Some(&overrides)).unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.convergence.max_iterations, 5);
    }

    #[test]
    fn test_load_config_workspace_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join(".cardsmith");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("config.toml"),
            r#"
[convergence]
max_iterations = 4
return_policy = "last"

[prompts]
use_optimized = true
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.convergence.max_iterations, 4);
        assert_eq!(config.convergence.return_policy, ReturnPolicy::Last);
        assert!(config.prompts.use_optimized);
        // Untouched sections keep their defaults.
        assert_eq!(config.optimizer.num_candidates, 10);
    }

    #[test]
    fn test_validate_warnings() {
        let mut config = CardsmithConfig::default();
        config.convergence.max_iterations = 0;
        config.llm.temperature = 3.5;
        let warnings = config.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().any(|w| w.starts_with("[convergence]")));
        assert!(warnings.iter().any(|w| w.starts_with("[llm]")));
    }

    #[test]
    fn test_huge_search_budget_warns_without_overflow() {
        let mut config = CardsmithConfig::default();
        config.optimizer.num_candidates = usize::MAX;
        config.optimizer.max_examples = 3;
        let warnings = config.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains(&usize::MAX.to_string()));
    }

    #[test]
    fn test_malformed_workspace_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join(".cardsmith");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("config.toml"),
            "[convergence]\nmax_iterations = \"three\"\n",
        )
        .unwrap();

        let err = load_config(Some(dir.path()), None).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        assert!(err.to_string().contains("max_iterations"));
    }

    #[test]
    fn test_api_key_missing_for_remote_endpoint() {
        let mut config = LlmConfig {
            api_key_env: "CARDSMITH_TEST_KEY_NEVER_SET".to_string(),
            ..LlmConfig::default()
        };
        match config.api_key() {
            Err(ConfigError::EnvVarMissing { var }) => {
                assert_eq!(var, "CARDSMITH_TEST_KEY_NEVER_SET");
            }
            other => panic!("Expected EnvVarMissing, got {:?}", other),
        }

        config.base_url = Some("http://127.0.0.1:8000/v1".to_string());
        assert_eq!(config.api_key().unwrap(), "ollama");
    }

    #[test]
    fn test_is_local() {
        let mut config = LlmConfig::default();
        assert!(!config.is_local());
        config.base_url = Some("http://localhost:11434/v1".to_string());
        assert!(config.is_local());
    }
}
