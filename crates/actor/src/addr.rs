use std::sync::{Arc, Weak};

use tracing::Instrument;

use crate::mailbox::{Mailbox, MailboxParts};
use crate::scheduler::run_actor;
use crate::{ActorState, MailboxClosed, Message};

/// Strong address of an actor.
///
/// The actor keeps running as long as at least one strong address exists,
/// or until [`Addr::stop`] is called.
pub struct Addr<S> {
    mailbox: Arc<Mailbox<S>>,
}

/// Weak address of an actor, which does not keep it alive.
pub struct WeakAddr<S> {
    mailbox: Weak<Mailbox<S>>,
}

impl<S: ActorState> Addr<S> {
    /// Spawns a new actor owning `state` on the current tokio runtime.
    ///
    /// Prefer [`crate::define_actor`], which wraps the address in a named
    /// type that can carry a typed API.
    pub fn spawn(state: S, label: &str) -> Self {
        let MailboxParts {
            mailbox,
            msg_rx,
            stop_rx,
        } = Mailbox::new();
        let mailbox = Arc::new(mailbox);
        tokio::spawn(
            run_actor(Arc::downgrade(&mailbox), state, msg_rx, stop_rx)
                .instrument(debug_span!("actor", label)),
        );
        Self { mailbox }
    }

    /// Sends a message to the actor.
    #[inline]
    pub fn send<M: Message<S>>(&self, msg: M) -> Result<(), MailboxClosed> {
        self.mailbox.send(Box::new(msg))
    }

    /// Asks the actor to stop.
    ///
    /// Messages already queued are discarded. The state's
    /// [`ActorState::on_stop`] hook runs before the actor task exits.
    #[inline]
    pub fn stop(&self) {
        self.mailbox.stop();
    }

    /// Creates a weak address to this actor.
    #[inline]
    pub fn downgrade(&self) -> WeakAddr<S> {
        WeakAddr {
            mailbox: Arc::downgrade(&self.mailbox),
        }
    }
}

impl<S> Addr<S> {
    #[inline]
    pub(crate) fn from_mailbox(mailbox: Arc<Mailbox<S>>) -> Self {
        Self { mailbox }
    }
}

impl<S: ActorState> WeakAddr<S> {
    /// Sends a message if the actor is still alive.
    pub fn send<M: Message<S>>(&self, msg: M) -> Result<(), MailboxClosed> {
        let mailbox = self.mailbox.upgrade().ok_or(MailboxClosed)?;
        mailbox.send(Box::new(msg))
    }

    /// Upgrades to a strong address if the actor is still alive.
    #[inline]
    pub fn upgrade(&self) -> Option<Addr<S>> {
        self.mailbox.upgrade().map(Addr::from_mailbox)
    }
}

impl<S> Clone for Addr<S> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            mailbox: Arc::clone(&self.mailbox),
        }
    }
}

impl<S> Clone for WeakAddr<S> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            mailbox: Weak::clone(&self.mailbox),
        }
    }
}
