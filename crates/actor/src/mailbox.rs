use std::fmt::Debug;

use tokio::sync::{mpsc, watch};

use crate::{Addr, MailboxClosed};

/// Helper trait for handling boxed messages.
pub trait BoxMessage<S>: Send + Debug + 'static {
    fn handle_box(self: Box<Self>, state: &mut S, addr: &Addr<S>);
}

/// A message that an actor owning `S` can handle.
pub trait Message<S>: BoxMessage<S> {
    /// Handles the message with exclusive access to the actor's state.
    ///
    /// Handlers run on the actor's task and must not block. Long work
    /// should be spawned and report back through
    /// [`Addr::downgrade`](crate::Addr::downgrade).
    fn handle(self, state: &mut S, addr: &Addr<S>);
}

impl<S, M: Message<S>> BoxMessage<S> for M {
    #[inline]
    fn handle_box(self: Box<Self>, state: &mut S, addr: &Addr<S>) {
        (*self).handle(state, addr)
    }
}

pub type BoxedMessage<S> = Box<dyn BoxMessage<S>>;

pub struct MailboxParts<S> {
    pub mailbox: Mailbox<S>,
    pub msg_rx: mpsc::UnboundedReceiver<BoxedMessage<S>>,
    pub stop_rx: watch::Receiver<bool>,
}

pub struct Mailbox<S> {
    msg_tx: mpsc::UnboundedSender<BoxedMessage<S>>,
    stop_tx: watch::Sender<bool>,
}

impl<S: 'static> Mailbox<S> {
    pub fn new() -> MailboxParts<S> {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        MailboxParts {
            mailbox: Mailbox { msg_tx, stop_tx },
            msg_rx,
            stop_rx,
        }
    }

    #[inline]
    pub fn send(&self, msg: BoxedMessage<S>) -> Result<(), MailboxClosed> {
        self.msg_tx.send(msg).map_err(|_| MailboxClosed)
    }

    #[inline]
    pub fn stop(&self) {
        self.stop_tx.send(true).ok();
    }
}
