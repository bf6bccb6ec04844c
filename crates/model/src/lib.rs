//! Provider-neutral types for talking to reasoning models.
//!
//! The orchestrator never speaks a provider's wire format directly. It
//! builds a [`ModelRequest`] from the conversation and the registered tool
//! schemas, and consumes a [`ModelResponse`] as a stream of
//! [`ModelResponseEvent`]s: text deltas, tool call requests, and a final
//! completion marker.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that provider implementations should adhere to.

#![deny(missing_docs)]

mod error;
mod provider;
mod request;
mod response;

pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
