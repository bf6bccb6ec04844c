use std::sync::Weak;

use tokio::select;
use tokio::sync::{mpsc, watch};

use crate::mailbox::{BoxedMessage, Mailbox};
use crate::{ActorState, Addr};

pub async fn run_actor<S: ActorState>(
    mailbox: Weak<Mailbox<S>>,
    mut state: S,
    mut msg_rx: mpsc::UnboundedReceiver<BoxedMessage<S>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    debug!("started");
    loop {
        let msg = select! {
            biased;

            _ = stop_rx.changed() => {
                debug!("stop requested");
                break;
            }
            msg = msg_rx.recv() => {
                let Some(msg) = msg else {
                    break;
                };
                msg
            }
        };
        trace!("received message: {msg:?}");

        // The strong address only lives while the message is handled, so
        // dropping every external address still stops the actor.
        let Some(mailbox) = mailbox.upgrade() else {
            debug!("all addresses dropped, discarding message");
            break;
        };
        let addr = Addr::from_mailbox(mailbox);
        trace_span!("handle").in_scope(|| msg.handle_box(&mut state, &addr));
    }

    // Refuse further messages before running the hook.
    msg_rx.close();
    state.on_stop();
    debug!("stopped");
}
