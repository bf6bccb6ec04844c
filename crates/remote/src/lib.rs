//! A client for tool servers that run as subprocesses and speak
//! newline-framed JSON over their standard streams.
//!
//! Each configured server is spawned when [`RemoteToolClient::start_all`]
//! is called and asked for its tools. Calls to one server share a single
//! channel and are matched to their responses by correlation id, so they
//! may be in flight concurrently and complete in any order.

#[macro_use]
extern crate tracing;

mod client;
mod config;
mod connection;
mod error;
pub mod protocol;

pub use client::{RemoteToolClient, ServerState};
pub use config::{ClientOptions, ServerConfig, Transport};
pub use error::Error;
