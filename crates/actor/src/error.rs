use std::error::Error;
use std::fmt;

/// Returned when a message is sent to an actor that is no longer running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MailboxClosed;

impl fmt::Display for MailboxClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("the actor's mailbox is closed")
    }
}

impl Error for MailboxClosed {}
