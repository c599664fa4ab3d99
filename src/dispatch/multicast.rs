use crate::{ChannelMessage, Client, Dispatcher};
use futures_util::future::{join_all, BoxFuture};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Sends each message to every eligible subscriber.
///
/// Deliveries run concurrently, and the dispatch completes once every
/// subscriber has either taken the message, been closed, or the channel has
/// been retired. A slow subscriber delays the next message on the channel,
/// but never prevents the others from receiving this one.
#[derive(Debug, Clone, Copy, Default)]
pub struct MulticastDispatcher;

impl Dispatcher for MulticastDispatcher {
    fn dispatch<'a>(
        &'a self,
        msg: ChannelMessage,
        subscribers: Vec<Arc<Client>>,
        channel_done: &'a CancellationToken,
    ) -> BoxFuture<'a, usize> {
        Box::pin(async move {
            let deliveries = subscribers
                .iter()
                .map(|client| client.deliver(msg.clone(), channel_done));

            let delivered = join_all(deliveries)
                .await
                .into_iter()
                .filter(|ok| *ok)
                .count();

            trace!(
                subscribers = subscribers.len(),
                delivered,
                "multicast dispatch complete"
            );
            delivered
        })
    }
}
