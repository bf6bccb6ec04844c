use std::sync::Arc;

use simpleagent_model::ModelProvider;

use super::Agent;
use crate::model_client::{ModelClient, RetryPolicy};
use crate::tool::ToolRegistry;
use crate::{AgentOptions, ConfigError};

/// [`Agent`] builder.
pub struct AgentBuilder {
    pub(crate) model_client: ModelClient,
    pub(crate) registry: Arc<ToolRegistry>,
    pub(crate) options: AgentOptions,
    pub(crate) system_prompt: Option<String>,
}

impl AgentBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self {
            model_client: ModelClient::new(provider, RetryPolicy::default()),
            registry: Default::default(),
            options: Default::default(),
            system_prompt: None,
        }
    }

    /// Sets the tools the model may call.
    #[inline]
    pub fn with_registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Overrides the default options.
    #[inline]
    pub fn with_options(mut self, options: AgentOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the system prompt sent ahead of the conversation.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Builds the agent and starts it on the current tokio runtime.
    #[inline]
    pub fn build(self) -> Result<Agent, ConfigError> {
        Agent::spawn_from_builder(self)
    }
}
