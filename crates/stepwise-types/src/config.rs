//! Engine configuration.
//!
//! Loaded from `{data_dir}/config.toml`. Every section and field has a
//! default, so an empty or partial file is valid.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default workflow-level timeout (30 minutes).
pub const DEFAULT_WORKFLOW_TIMEOUT_SECS: u64 = 1800;

/// Default timeout for the `fetch` tool.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// User-Agent sent by `fetch` when the workflow does not set one.
pub const DEFAULT_USER_AGENT: &str = concat!("stepwise/", env!("CARGO_PKG_VERSION"));

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepwiseConfig {
    /// Root for persisted plans. Filled in from the resolved data dir when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    pub executor: ExecutorConfig,
    pub fetch: FetchConfig,
    pub generator: GeneratorConfig,
}

/// Scheduler limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Applied when a workflow declares no `timeout`.
    pub default_workflow_timeout_secs: u64,
    /// Maximum concurrently running steps per execution. 0 means unlimited.
    pub max_parallel_steps: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_workflow_timeout_secs: DEFAULT_WORKFLOW_TIMEOUT_SECS,
            max_parallel_steps: 0,
        }
    }
}

/// HTTP settings for the `fetch` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// OpenAI-compatible generator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: crate::llm::DEFAULT_TEMPERATURE,
            max_tokens: crate::llm::DEFAULT_MAX_TOKENS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: StepwiseConfig = toml::from_str("").unwrap();
        assert_eq!(config, StepwiseConfig::default());
        assert_eq!(config.executor.default_workflow_timeout_secs, 1800);
        assert_eq!(config.fetch.timeout_secs, 30);
        assert_eq!(config.generator.max_tokens, 1000);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: StepwiseConfig = toml::from_str(
            r#"
            data_dir = "/var/lib/stepwise"

            [executor]
            max_parallel_steps = 4

            [generator]
            model = "llama3"
            base_url = "http://localhost:11434/v1"
            "#,
        )
        .unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/stepwise")));
        assert_eq!(config.executor.max_parallel_steps, 4);
        assert_eq!(config.executor.default_workflow_timeout_secs, 1800);
        assert_eq!(config.generator.model, "llama3");
        assert_eq!(config.generator.api_key_env, "OPENAI_API_KEY");
    }

    #[test]
    fn test_user_agent_default() {
        assert!(FetchConfig::default().user_agent.starts_with("stepwise/"));
    }
}
