use std::io;

use simpleagent_core::tool;

use crate::Transport;

/// Errors of the remote tool client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to spawn server `{server_id}`: {source}")]
    Spawn {
        server_id: String,
        #[source]
        source: io::Error,
    },

    #[error("server `{0}` is configured twice")]
    DuplicateServer(String),

    #[error(
        "server `{server_id}` uses the {transport} transport, \
         only stdio is supported"
    )]
    UnsupportedTransport {
        server_id: String,
        transport: Transport,
    },

    #[error("no server named `{0}`")]
    UnknownServer(String),

    #[error("server `{0}` is unavailable")]
    Unavailable(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{0}")]
    Remote(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("timed out waiting for the server")]
    Timeout,
}

impl Error {
    /// Returns `true` for errors in the server configuration, which are
    /// fatal at startup.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::Spawn { .. }
                | Error::DuplicateServer(_)
                | Error::UnsupportedTransport { .. }
        )
    }
}

impl From<Error> for tool::Error {
    fn from(err: Error) -> Self {
        let base = match &err {
            Error::Spawn { .. }
            | Error::UnknownServer(_)
            | Error::Unavailable(_)
            | Error::Io(_) => tool::Error::server_unavailable(),
            Error::Protocol(_) | Error::Json(_) => {
                tool::Error::protocol_error()
            }
            Error::Remote(_) => tool::Error::execution_error(),
            Error::Timeout => tool::Error::timeout(),
            Error::DuplicateServer(_) | Error::UnsupportedTransport { .. } => {
                tool::Error::invalid_input()
            }
        };
        base.with_reason(err.to_string())
    }
}
