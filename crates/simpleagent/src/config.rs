use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use simpleagent_core::AgentOptions;
use simpleagent_openai_model::{OpenAIConfig, OpenAIConfigBuilder};
use simpleagent_remote::ServerConfig;

/// The environment variable holding the model provider's API key.
pub const API_KEY_VAR: &str = "OPENAI_API_KEY";

/// The environment variable pointing at a local Ollama server.
pub const OLLAMA_BASE_URL_VAR: &str = "OLLAMA_BASE_URL";

const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Model providers the application can talk to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Provider {
    /// The OpenAI API, or any endpoint compatible with it.
    OpenAI,
    /// A local Ollama server, reached through its OpenAI-compatible API.
    Ollama,
}

impl Provider {
    /// Looks up a provider by its configured name. `local` is another name
    /// for Ollama.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "openai" => Some(Provider::OpenAI),
            "ollama" | "local" => Some(Provider::Ollama),
            _ => None,
        }
    }

    /// Returns `true` if requests must carry an API key.
    #[inline]
    pub fn requires_api_key(self) -> bool {
        matches!(self, Provider::OpenAI)
    }
}

/// Errors while loading the application configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read configuration file {}: {source}", path.display())]
    Read {
        /// The configuration file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid JSON or does not match the expected shape.
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
    /// The configured model provider is not supported.
    #[error("unsupported model provider `{0}`")]
    UnsupportedProvider(String),
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// The API key is not set.
    #[error("the OPENAI_API_KEY environment variable is not set")]
    MissingApiKey,
}

/// Which model to talk to.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ModelConfig {
    /// The provider: `openai`, or `ollama` (also called `local`).
    pub provider: String,
    /// Name of the model.
    pub name: String,
    /// Base URL of an OpenAI-compatible endpoint, overriding the
    /// provider's default.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Upper bound of tokens generated per model call.
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl ModelConfig {
    /// Returns the configured provider.
    pub fn provider(&self) -> Result<Provider, ConfigError> {
        Provider::from_name(&self.provider).ok_or_else(|| {
            ConfigError::UnsupportedProvider(self.provider.clone())
        })
    }
}

/// Overrides of the orchestrator limits.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct AgentConfig {
    /// Model calls allowed in one run.
    #[serde(default)]
    pub max_steps: Option<usize>,
    /// Seconds a single tool call may take.
    #[serde(default)]
    pub tool_timeout_secs: Option<u64>,
    /// Tool calls allowed to run at the same time.
    #[serde(default)]
    pub max_concurrent_tools: Option<usize>,
}

/// The application configuration file.
///
/// ```json
/// {
///   "model": { "provider": "openai", "name": "gpt-4o-mini" },
///   "mcpservers": {
///     "genes": { "command": "python", "args": ["genes.py"] }
///   },
///   "agent": { "max_steps": 12 }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AppConfig {
    /// The model.
    pub model: ModelConfig,
    /// Tool servers keyed by id.
    #[serde(default)]
    pub mcpservers: BTreeMap<String, ServerConfig>,
    /// Orchestrator limits.
    #[serde(default)]
    pub agent: AgentConfig,
}

impl AppConfig {
    /// Reads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_owned(),
                source,
            })?;
        let config = Self::from_json(&content)?;
        debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parses and validates a configuration.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_json::from_str(json)?;
        config.model.provider()?;
        let empty = config
            .mcpservers
            .iter()
            .find(|(_, server)| server.command.is_empty());
        if let Some((id, _)) = empty {
            return Err(ConfigError::Invalid(format!(
                "server `{id}` has an empty command"
            )));
        }
        Ok(config)
    }

    /// Returns the tool servers, with their ids filled in.
    pub fn servers(&self) -> Vec<ServerConfig> {
        self.mcpservers
            .iter()
            .map(|(id, server)| ServerConfig {
                id: id.clone(),
                ..server.clone()
            })
            .collect()
    }

    /// Returns the orchestrator options, defaults where not overridden.
    pub fn agent_options(&self) -> AgentOptions {
        let defaults = AgentOptions::default();
        let agent = &self.agent;
        AgentOptions {
            max_steps: agent.max_steps.unwrap_or(defaults.max_steps),
            tool_timeout: agent
                .tool_timeout_secs
                .map_or(defaults.tool_timeout, Duration::from_secs),
            max_concurrent_tools: agent
                .max_concurrent_tools
                .unwrap_or(defaults.max_concurrent_tools),
            ..defaults
        }
    }

    /// Builds the provider configuration, reading the API key and the
    /// Ollama endpoint from the process environment.
    pub fn provider_config_from_env(
        &self,
    ) -> Result<OpenAIConfig, ConfigError> {
        self.provider_config(|name| std::env::var(name).ok())
    }

    /// Builds the provider configuration, reading variables with `env`.
    ///
    /// Ollama serves the OpenAI wire format under `/v1` and needs no key.
    pub fn provider_config<F>(
        &self,
        env: F,
    ) -> Result<OpenAIConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let provider = self.model.provider()?;
        let var = |name: &str| env(name).filter(|value| !value.is_empty());

        let api_key = match var(API_KEY_VAR) {
            Some(key) => key,
            None if provider.requires_api_key() => {
                return Err(ConfigError::MissingApiKey);
            }
            None => String::new(),
        };
        let default_base_url = match provider {
            Provider::OpenAI => None,
            Provider::Ollama => {
                let base_url = var(OLLAMA_BASE_URL_VAR)
                    .unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.to_owned());
                Some(format!("{}/v1", base_url.trim_end_matches('/')))
            }
        };

        let mut builder = OpenAIConfigBuilder::with_api_key(api_key)
            .with_model(&self.model.name);
        if let Some(base_url) = self.model.base_url.clone().or(default_base_url)
        {
            builder = builder.with_base_url(base_url);
        }
        if let Some(max_tokens) = self.model.max_tokens {
            builder = builder.with_max_tokens(max_tokens);
        }
        debug!("using the {provider:?} model provider");
        Ok(builder.build())
    }
}
