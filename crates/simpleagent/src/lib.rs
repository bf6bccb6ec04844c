//! An out-of-the-box agent that assembles built-in tools, remote tool
//! servers and a model provider into a chat session.
//!
//! The crate includes a CLI tool for using in the terminal. And you can also
//! use it as a library to bring agent functionality into your own host apps.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

/// Configuration loading for sessions.
pub mod config;
mod error;
mod mentions;
mod session;
pub mod tools;

pub use error::Error;
pub use mentions::expand_mentions;
pub use session::{Session, SessionBuilder};

/// Re-exports of [`simpleagent_core`] crate.
pub mod core {
    pub use simpleagent_core::*;
}

/// Re-exports of [`simpleagent_remote`] crate.
pub mod remote {
    pub use simpleagent_remote::*;
}
