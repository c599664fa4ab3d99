//! Rendezvous hand-off between pumps, channels and dispatchers.
//!
//! A [`Mailbox`] behaves like an unbuffered channel: [`Mailbox::deliver`]
//! only resolves once the receiving side has finished with the message. The
//! queue itself holds at most one [`Envelope`], and every envelope carries a
//! oneshot acknowledgement that the receiver completes after processing.

use crate::ChannelMessage;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, MutexGuard};

/// Acknowledgement for a single hand-off. Dropping it without calling
/// [`Ack::complete`] fails the hand-off.
#[derive(Debug)]
pub(crate) struct Ack(oneshot::Sender<()>);

impl Ack {
    /// Tell the sender that the message has been processed.
    pub(crate) fn complete(self) {
        let _ = self.0.send(());
    }
}

/// A message in flight, together with its acknowledgement.
#[derive(Debug)]
pub(crate) struct Envelope {
    msg: ChannelMessage,
    ack: Ack,
}

impl Envelope {
    pub(crate) fn into_parts(self) -> (ChannelMessage, Ack) {
        (self.msg, self.ack)
    }
}

/// The receiving end of a [`Mailbox`], held by exactly one pump or dispatch
/// loop at a time.
pub(crate) type Inbox<'a> = MutexGuard<'a, mpsc::Receiver<Envelope>>;

#[derive(Debug)]
pub(crate) struct Mailbox {
    /// `None` once the mailbox has been closed.
    tx: Mutex<Option<mpsc::Sender<Envelope>>>,
    rx: AsyncMutex<mpsc::Receiver<Envelope>>,
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Mailbox {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx: Mutex::new(Some(tx)),
            rx: AsyncMutex::new(rx),
        }
    }

    /// Hand `msg` to the receiver and wait until it has been processed.
    ///
    /// Returns `false` if the mailbox is closed, or if the receiver dropped
    /// the message without acknowledging it.
    pub(crate) async fn deliver(&self, msg: ChannelMessage) -> bool {
        let Some(tx) = self.tx.lock().clone() else {
            return false;
        };

        let (ack, done) = oneshot::channel();
        if tx.send(Envelope { msg, ack: Ack(ack) }).await.is_err() {
            return false;
        }
        drop(tx);

        done.await.is_ok()
    }

    /// Close the sending side. Messages already queued are still received.
    /// Returns `true` if this call closed the mailbox.
    pub(crate) fn close(&self) -> bool {
        self.tx.lock().take().is_some()
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// Take the receiving end.
    pub(crate) async fn inbox(&self) -> Inbox<'_> {
        self.rx.lock().await
    }

    /// Stop receiving for good: fail all queued hand-offs, and make every
    /// future [`Self::deliver`] return immediately.
    pub(crate) fn shutdown(&self, inbox: &mut Inbox<'_>) {
        self.close();
        inbox.close();
        while let Ok(envelope) = inbox.try_recv() {
            drop(envelope);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Direction;
    use bytes::Bytes;
    use std::sync::Arc;

    fn msg(data: &'static [u8]) -> ChannelMessage {
        ChannelMessage::new(Bytes::from_static(data), "test".into(), Direction::Input)
    }

    #[tokio::test]
    async fn deliver_waits_for_ack() {
        let mailbox = Arc::new(Mailbox::new());

        let receiver = {
            let mailbox = mailbox.clone();
            tokio::spawn(async move {
                let mut inbox = mailbox.inbox().await;
                let (msg, ack) = inbox.recv().await.unwrap().into_parts();
                ack.complete();
                msg
            })
        };

        assert!(mailbox.deliver(msg(b"hello")).await);
        assert_eq!(receiver.await.unwrap().data, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn dropped_ack_fails_delivery() {
        let mailbox = Arc::new(Mailbox::new());

        let receiver = {
            let mailbox = mailbox.clone();
            tokio::spawn(async move {
                let mut inbox = mailbox.inbox().await;
                drop(inbox.recv().await.unwrap());
            })
        };

        assert!(!mailbox.deliver(msg(b"lost")).await);
        receiver.await.unwrap();
    }

    #[tokio::test]
    async fn closed_mailbox_rejects() {
        let mailbox = Mailbox::new();
        assert!(mailbox.close());
        assert!(!mailbox.close());
        assert!(mailbox.is_closed());
        assert!(!mailbox.deliver(msg(b"nope")).await);
    }

    #[tokio::test]
    async fn shutdown_fails_pending_and_future_deliveries() {
        let mailbox = Arc::new(Mailbox::new());

        let pending = {
            let mailbox = mailbox.clone();
            tokio::spawn(async move { mailbox.deliver(msg(b"queued")).await })
        };
        tokio::task::yield_now().await;

        {
            let mut inbox = mailbox.inbox().await;
            mailbox.shutdown(&mut inbox);
        }

        assert!(!pending.await.unwrap());
        assert!(!mailbox.deliver(msg(b"late")).await);
    }
}
