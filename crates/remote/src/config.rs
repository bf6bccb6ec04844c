use std::collections::HashMap;
use std::fmt::{self, Display};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the client talks to a server.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Newline-framed JSON over the subprocess's stdin and stdout.
    #[default]
    Stdio,
    /// Server-sent events. Not supported.
    Sse,
    /// Streamable HTTP. Not supported.
    StreamableHttp,
}

impl Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Transport::Stdio => "stdio",
            Transport::Sse => "sse",
            Transport::StreamableHttp => "streamable_http",
        };
        f.write_str(s)
    }
}

/// How to launch one tool server.
///
/// The id is not part of the serialized form, configuration files key
/// servers by id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(skip)]
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub transport: Transport,
}

impl ServerConfig {
    /// Creates a stdio server config with no arguments.
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            ..Default::default()
        }
    }

    #[inline]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[inline]
    pub fn with_env(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Settings shared by all servers of a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientOptions {
    /// How long a server may take to answer the tool listing.
    pub discovery_timeout: Duration,
    /// How long a server may take to exit after its stdin is closed, before
    /// it is killed.
    pub shutdown_grace: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            discovery_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_deserialize() {
        let config: ServerConfig = serde_json::from_value(json!({
            "command": "python",
            "args": ["server.py"],
            "env": { "LEVEL": "debug" }
        }))
        .unwrap();
        assert_eq!(
            config,
            ServerConfig::new("", "python")
                .with_args(["server.py"])
                .with_env("LEVEL", "debug")
        );

        let config: ServerConfig = serde_json::from_value(json!({
            "command": "server",
            "transport": "streamable_http"
        }))
        .unwrap();
        assert_eq!(config.transport, Transport::StreamableHttp);

        let err = serde_json::from_value::<ServerConfig>(json!({
            "command": "server",
            "transport": "carrier_pigeon"
        }))
        .unwrap_err();
        assert!(err.to_string().contains("unknown variant"));
    }
}
