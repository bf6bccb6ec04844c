//! Orchestration core: conversation state, the tool registry, the retrying
//! model client and the agent state machine that drives them.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod agent;
pub mod conversation;
mod model_client;
mod options;
mod run;
pub mod tool;

pub use agent::{Agent, AgentBuilder};
pub use options::{AgentOptions, ConfigError};
pub use run::{CancelHandle, Failure, FailureKind, Run, RunEvent, RunResult};
