//! A small single-owner actor runtime.
//!
//! An actor owns its state exclusively and processes one message at a time,
//! so handlers mutate the state without locks. Work that must not block the
//! mailbox runs in spawned tasks, which report back by sending messages
//! through a [`WeakAddr`].

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod addr;
mod error;
mod macros;
mod mailbox;
mod scheduler;

pub use addr::{Addr, WeakAddr};
pub use error::MailboxClosed;
pub use mailbox::Message;

/// State owned by an actor.
pub trait ActorState: Send + 'static {
    /// Called once on the actor's task after the last message was handled,
    /// whether the actor was stopped or every strong address was dropped.
    fn on_stop(&mut self) {}
}
