use crate::{ChannelMessage, Client, Dispatcher};
use futures_util::future::BoxFuture;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Sends each message to exactly one subscriber, rotating through the
/// subscriber set.
///
/// Subscribers are ordered by id, and a per-dispatcher counter picks the next
/// one. Every channel owns its own dispatcher, so topics rotate
/// independently.
///
/// Messages dispatched while no subscriber is present are dropped. Publishers
/// that need delivery should set [`Client::with_block_write`].
#[derive(Debug, Default)]
pub struct RoundRobinDispatcher {
    index: AtomicU64,
}

impl RoundRobinDispatcher {
    /// Instantiate a new dispatcher, starting at the first subscriber.
    pub const fn new() -> Self {
        Self {
            index: AtomicU64::new(0),
        }
    }

    /// Pick the subscriber slot for the next message.
    fn next_slot(&self, len: usize) -> usize {
        (self.index.fetch_add(1, Ordering::Relaxed) % len as u64) as usize
    }
}

impl Dispatcher for RoundRobinDispatcher {
    fn dispatch<'a>(
        &'a self,
        msg: ChannelMessage,
        mut subscribers: Vec<Arc<Client>>,
        channel_done: &'a CancellationToken,
    ) -> BoxFuture<'a, usize> {
        Box::pin(async move {
            if subscribers.is_empty() {
                trace!(sender = %msg.client_id, "no subscribers, dropping message");
                return 0;
            }

            subscribers.sort_by(|a, b| a.id().cmp(b.id()));
            let selected = &subscribers[self.next_slot(subscribers.len())];

            trace!(recipient = %selected.id(), "round robin dispatch");
            usize::from(selected.deliver(msg, channel_done).await)
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Direction;
    use bytes::Bytes;

    fn counting(client: Arc<Client>) -> tokio::task::JoinHandle<usize> {
        tokio::spawn(async move {
            let mut inbox = client.mailbox.inbox().await;
            let mut count = 0;
            while let Some(envelope) = inbox.recv().await {
                count += 1;
                envelope.into_parts().1.complete();
            }
            count
        })
    }

    #[tokio::test]
    async fn rotates_evenly() {
        // Deliberately out of id order.
        let subs: Vec<_> = ["c", "a", "b"]
            .into_iter()
            .map(|id| Arc::new(Client::new(id, Direction::Output)))
            .collect();
        let counters: Vec<_> = subs.iter().cloned().map(counting).collect();

        let dispatcher = RoundRobinDispatcher::new();
        let done = CancellationToken::new();
        for _ in 0..9 {
            let msg = ChannelMessage::new(Bytes::from_static(b"m"), "pub".into(), Direction::Input);
            assert_eq!(dispatcher.dispatch(msg, subs.clone(), &done).await, 1);
        }

        subs.iter().for_each(|c| c.close_mailbox());
        for counter in counters {
            assert_eq!(counter.await.unwrap(), 3);
        }
    }

    #[tokio::test]
    async fn order_is_by_id() {
        let a = Arc::new(Client::new("a", Direction::Output));
        let b = Arc::new(Client::new("b", Direction::Output));
        let count_a = counting(a.clone());
        let count_b = counting(b.clone());

        let dispatcher = RoundRobinDispatcher::new();
        let done = CancellationToken::new();
        let msg = ChannelMessage::new(Bytes::from_static(b"m"), "pub".into(), Direction::Input);
        // first slot is the lowest id, whatever the input order
        dispatcher
            .dispatch(msg, vec![b.clone(), a.clone()], &done)
            .await;

        a.close_mailbox();
        b.close_mailbox();
        assert_eq!(count_a.await.unwrap(), 1);
        assert_eq!(count_b.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_subscriber_set_drops() {
        let dispatcher = RoundRobinDispatcher::default();
        let done = CancellationToken::new();
        let msg = ChannelMessage::new(Bytes::new(), "pub".into(), Direction::Input);
        assert_eq!(dispatcher.dispatch(msg, Vec::new(), &done).await, 0);
    }
}
