use std::collections::HashSet;
use std::fmt::{self, Debug, Display};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use simpleagent_core::ConfigError;
use simpleagent_core::tool::{RemoteInvoker, ToolRegistry, ToolResult, ToolSpec};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::connection::Connection;
use crate::protocol::{CallToolParams, ListToolsResult, Method};
use crate::{ClientOptions, Error, ServerConfig, Transport};

/// Lifecycle of a configured server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServerState {
    /// Launched, the tool listing has not completed yet.
    Starting,
    /// Discovery succeeded and calls are accepted.
    Ready,
    /// Discovery failed or the server broke the protocol. Calls fail until
    /// the server is restarted.
    Degraded,
    /// The process exited or was shut down.
    Terminated,
}

impl Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerState::Starting => "starting",
            ServerState::Ready => "ready",
            ServerState::Degraded => "degraded",
            ServerState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

struct Server {
    config: ServerConfig,
    connection: RwLock<Option<Arc<Connection>>>,
    tools: Mutex<Vec<ToolSpec>>,
    // Serializes restarts and shutdown.
    lifecycle: AsyncMutex<()>,
}

impl Server {
    #[inline]
    fn connection(&self) -> Option<Arc<Connection>> {
        self.connection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[inline]
    fn replace_connection(
        &self,
        connection: Option<Arc<Connection>>,
    ) -> Option<Arc<Connection>> {
        let mut slot = self
            .connection
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, connection)
    }

    #[inline]
    fn tools(&self) -> MutexGuard<'_, Vec<ToolSpec>> {
        self.tools.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ServerState {
        self.connection()
            .map_or(ServerState::Terminated, |conn| conn.state())
    }
}

/// Connections to all configured tool servers.
///
/// Servers are addressed by their configured id. Each one is backed by a
/// single subprocess whose channel is shared by concurrent calls.
pub struct RemoteToolClient {
    servers: Vec<Server>,
    options: ClientOptions,
}

impl RemoteToolClient {
    /// Launches every configured server and discovers its tools.
    ///
    /// Servers are started concurrently. Launch failures and invalid
    /// configurations are returned as errors, after the servers that did
    /// start are shut down again. A server that fails discovery does not
    /// fail startup, it is left [`ServerState::Degraded`] and contributes no
    /// tools.
    pub async fn start_all(
        configs: Vec<ServerConfig>,
        options: ClientOptions,
    ) -> Result<Self, Error> {
        let mut seen = HashSet::new();
        for config in &configs {
            if !seen.insert(config.id.as_str()) {
                return Err(Error::DuplicateServer(config.id.clone()));
            }
            if config.transport != Transport::Stdio {
                return Err(Error::UnsupportedTransport {
                    server_id: config.id.clone(),
                    transport: config.transport,
                });
            }
        }

        let mut servers = Vec::with_capacity(configs.len());
        for config in configs {
            let spawned = Connection::spawn(&config, options.shutdown_grace);
            let connection = match spawned {
                Ok(connection) => Arc::new(connection),
                Err(err) => {
                    let client = Self { servers, options };
                    client.shutdown().await;
                    return Err(err);
                }
            };
            servers.push(Server {
                config,
                connection: RwLock::new(Some(connection)),
                tools: Default::default(),
                lifecycle: Default::default(),
            });
        }

        let mut discoveries = JoinSet::new();
        for (idx, server) in servers.iter().enumerate() {
            let Some(connection) = server.connection() else {
                continue;
            };
            let limit = options.discovery_timeout;
            discoveries.spawn(async move {
                (idx, discover(&connection, limit).await)
            });
        }
        let client = Self { servers, options };
        while let Some(joined) = discoveries.join_next().await {
            let Ok((idx, discovered)) = joined else {
                continue;
            };
            client
                .finish_discovery(&client.servers[idx], &discovered)
                .await;
        }
        Ok(client)
    }

    async fn finish_discovery(
        &self,
        server: &Server,
        discovered: &Result<Vec<ToolSpec>, Error>,
    ) {
        let Some(connection) = server.connection() else {
            return;
        };
        let server_id = &server.config.id;
        match discovered {
            Ok(tools) => {
                info!(
                    server_id = %server_id,
                    tools = tools.len(),
                    "server is ready"
                );
                server.tools().clone_from(tools);
                connection.set_state(ServerState::Ready);
            }
            Err(err) => {
                warn!(server_id = %server_id, "discovery failed: {err}");
                server.tools().clear();
                connection.set_state(ServerState::Degraded);
                connection.shutdown().await;
            }
        }
    }

    fn server(&self, server_id: &str) -> Result<&Server, Error> {
        self.servers
            .iter()
            .find(|server| server.config.id == server_id)
            .ok_or_else(|| Error::UnknownServer(server_id.to_owned()))
    }

    fn ready_connection(
        &self,
        server_id: &str,
    ) -> Result<Arc<Connection>, Error> {
        let server = self.server(server_id)?;
        server
            .connection()
            .filter(|conn| conn.state() == ServerState::Ready)
            .ok_or_else(|| Error::Unavailable(server_id.to_owned()))
    }

    /// Returns the ids of all configured servers.
    pub fn server_ids(&self) -> impl Iterator<Item = &str> {
        self.servers.iter().map(|server| server.config.id.as_str())
    }

    /// Returns the lifecycle state of a server.
    pub fn status(&self, server_id: &str) -> Option<ServerState> {
        self.server(server_id).ok().map(Server::state)
    }

    /// Returns the lifecycle state of every server, in configuration order.
    pub fn statuses(&self) -> Vec<(String, ServerState)> {
        self.servers
            .iter()
            .map(|server| (server.config.id.clone(), server.state()))
            .collect()
    }

    /// Returns the tools found by the last discovery of a server.
    pub fn tools(&self, server_id: &str) -> Vec<ToolSpec> {
        self.server(server_id)
            .map(|server| server.tools().clone())
            .unwrap_or_default()
    }

    /// Asks a ready server for its tools again.
    pub async fn list_tools(
        &self,
        server_id: &str,
    ) -> Result<Vec<ToolSpec>, Error> {
        let connection = self.ready_connection(server_id)?;
        discover(&connection, self.options.discovery_timeout).await
    }

    /// Calls a tool on a server.
    ///
    /// Fails fast with [`Error::Unavailable`] if the server is not ready.
    /// If the server goes away while the call is in flight, the call fails
    /// the same way.
    pub async fn call_tool(
        &self,
        server_id: &str,
        tool_name: &str,
        arguments: Value,
    ) -> Result<Value, Error> {
        let connection = self.ready_connection(server_id)?;
        let params = serde_json::to_value(CallToolParams {
            name: tool_name.to_owned(),
            arguments,
        })?;
        debug!(server_id = %server_id, "calling remote tool {tool_name}");
        connection.request(Method::CallTool, params).await
    }

    /// Relaunches a server and discovers its tools again.
    ///
    /// The previous process is shut down first, whatever its state. Tools
    /// that were registered for the server before work again once this
    /// succeeds.
    pub async fn restart(
        &self,
        server_id: &str,
    ) -> Result<Vec<ToolSpec>, Error> {
        let server = self.server(server_id)?;
        let _lifecycle = server.lifecycle.lock().await;

        if let Some(previous) = server.replace_connection(None) {
            previous.shutdown().await;
        }
        info!(server_id = %server_id, "restarting server");
        let connection = Arc::new(Connection::spawn(
            &server.config,
            self.options.shutdown_grace,
        )?);
        server.replace_connection(Some(Arc::clone(&connection)));

        let discovered =
            discover(&connection, self.options.discovery_timeout).await;
        self.finish_discovery(server, &discovered).await;
        discovered
    }

    /// Registers the tools of every ready server.
    pub fn register_tools(
        self: &Arc<Self>,
        registry: &mut ToolRegistry,
    ) -> Result<(), ConfigError> {
        for server in &self.servers {
            if server.state() != ServerState::Ready {
                continue;
            }
            let tools = server.tools().clone();
            let invoker: Arc<dyn RemoteInvoker> = Arc::clone(self) as _;
            registry.register_remote(&server.config.id, tools, invoker)?;
        }
        Ok(())
    }

    /// Closes the channel to every server and waits for them to exit.
    pub async fn shutdown(&self) {
        let mut exits = JoinSet::new();
        for server in &self.servers {
            let _lifecycle = server.lifecycle.lock().await;
            if let Some(connection) = server.connection() {
                exits.spawn(async move { connection.shutdown().await });
            }
        }
        while exits.join_next().await.is_some() {}
        debug!("all servers shut down");
    }
}

#[async_trait]
impl RemoteInvoker for RemoteToolClient {
    async fn call(
        &self,
        server_id: &str,
        tool_name: &str,
        arguments: Value,
    ) -> ToolResult {
        self.call_tool(server_id, tool_name, arguments)
            .await
            .map_err(Into::into)
    }
}

impl Debug for RemoteToolClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteToolClient")
            .field("servers", &self.statuses())
            .finish_non_exhaustive()
    }
}

async fn discover(
    connection: &Connection,
    limit: std::time::Duration,
) -> Result<Vec<ToolSpec>, Error> {
    let request = connection.request(Method::ListTools, Value::Null);
    let result = timeout(limit, request)
        .await
        .map_err(|_| Error::Timeout)??;
    let listed: ListToolsResult =
        serde_json::from_value(result).map_err(|err| {
            Error::Protocol(format!("invalid tool listing: {err}"))
        })?;
    Ok(listed.tools.into_iter().map(Into::into).collect())
}
