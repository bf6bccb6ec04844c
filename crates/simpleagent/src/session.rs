use std::path::PathBuf;
use std::sync::Arc;

use simpleagent_core::conversation::Conversation;
use simpleagent_core::tool::{ToolDescriptor, ToolRegistry};
use simpleagent_core::{Agent, AgentBuilder, AgentOptions, Run};
use simpleagent_model::ModelProvider;
use simpleagent_remote::{
    ClientOptions, RemoteToolClient, ServerConfig, ServerState,
};

use crate::Error;
use crate::tools::*;

/// A session builder.
///
/// See [`Session`].
pub struct SessionBuilder {
    agent_builder: AgentBuilder,
    options: AgentOptions,
    servers: Vec<ServerConfig>,
    client_options: ClientOptions,
    root: PathBuf,
}

impl SessionBuilder {
    /// Creates a session builder with a specified model provider.
    pub fn with_model_provider<M: ModelProvider + 'static>(
        provider: M,
    ) -> Self {
        Self {
            agent_builder: AgentBuilder::with_model_provider(provider),
            options: AgentOptions::default(),
            servers: vec![],
            client_options: ClientOptions::default(),
            root: PathBuf::from("."),
        }
    }

    /// Sets the system prompt for the agent.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.agent_builder = self.agent_builder.with_system_prompt(prompt);
        self
    }

    /// Sets the orchestrator limits.
    #[inline]
    pub fn with_options(mut self, options: AgentOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the tool servers to launch.
    #[inline]
    pub fn with_servers(mut self, servers: Vec<ServerConfig>) -> Self {
        self.servers = servers;
        self
    }

    /// Sets the timeouts used with tool servers.
    #[inline]
    pub fn with_client_options(mut self, options: ClientOptions) -> Self {
        self.client_options = options;
        self
    }

    /// Sets the directory relative paths of the file tools start from.
    #[inline]
    pub fn with_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.root = root.into();
        self
    }

    /// Launches the tool servers and builds a new session.
    ///
    /// Servers that fail discovery are left out. Any other failure shuts
    /// down the servers that were already started.
    pub async fn build(self) -> Result<Session, Error> {
        let remote = if self.servers.is_empty() {
            None
        } else {
            let client =
                RemoteToolClient::start_all(self.servers, self.client_options)
                    .await?;
            Some(Arc::new(client))
        };

        let assembled = assemble(
            self.agent_builder,
            self.options,
            &self.root,
            remote.as_ref(),
        );
        match assembled {
            Ok((agent, registry)) => Ok(Session {
                agent,
                registry,
                remote,
            }),
            Err(err) => {
                if let Some(remote) = &remote {
                    remote.shutdown().await;
                }
                Err(err)
            }
        }
    }
}

fn assemble(
    agent_builder: AgentBuilder,
    options: AgentOptions,
    root: &std::path::Path,
    remote: Option<&Arc<RemoteToolClient>>,
) -> Result<(Agent, Arc<ToolRegistry>), Error> {
    let mut registry = ToolRegistry::new();
    registry.register(DoSleepTool::new())?;
    registry.register_blocking(ReadFileTool::new(root))?;
    registry.register_blocking(GlobTool::new(root))?;
    if let Some(remote) = remote {
        remote.register_tools(&mut registry)?;
    }
    let registry = Arc::new(registry);
    let agent = agent_builder
        .with_registry(Arc::clone(&registry))
        .with_options(options)
        .build()?;
    Ok((agent, registry))
}

/// A chat session, like a window that displays messages and has a input box.
///
/// The session holds a fully configured agent and the tool servers it
/// talks to. Submissions are answered one at a time: a submission made
/// while the previous one is still running finishes right away as busy.
pub struct Session {
    agent: Agent,
    registry: Arc<ToolRegistry>,
    remote: Option<Arc<RemoteToolClient>>,
}

impl Session {
    /// Submits a message to the session.
    ///
    /// The returned [`Run`] streams the answer as it is produced and ends
    /// with the outcome.
    #[inline]
    pub fn submit(&self, message: &str) -> Run {
        self.agent.submit(message)
    }

    /// Returns a copy of the conversation so far.
    #[inline]
    pub async fn conversation(&self) -> Conversation {
        self.agent.conversation().await
    }

    /// Returns the tools available to the model.
    #[inline]
    pub fn tools(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.registry.descriptors()
    }

    /// Returns the state of every tool server.
    pub fn server_statuses(&self) -> Vec<(String, ServerState)> {
        self.remote
            .as_ref()
            .map(|remote| remote.statuses())
            .unwrap_or_default()
    }

    /// Relaunches a tool server.
    ///
    /// Only the tools the server offered at startup are callable
    /// afterwards.
    pub async fn restart_server(&self, server_id: &str) -> Result<(), Error> {
        let Some(remote) = &self.remote else {
            return Err(simpleagent_remote::Error::UnknownServer(
                server_id.to_owned(),
            )
            .into());
        };
        let tools = remote.restart(server_id).await?;
        info!("server {server_id} restarted with {} tools", tools.len());
        Ok(())
    }

    /// Stops the agent and the tool servers.
    pub async fn shutdown(self) {
        self.agent.shutdown();
        if let Some(remote) = &self.remote {
            remote.shutdown().await;
        }
    }
}
