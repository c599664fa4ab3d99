use crate::{mailbox::Mailbox, Channel, ChannelMessage, ClientId, Direction};
use core::fmt;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::select;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// One connected endpoint of the relay: a publisher, a subscriber, or a pipe.
///
/// A client is created for a single [`Broker::connect`] call, and is shared
/// (as `Arc<Client>`) between that call and the [`Channel`]s it is registered
/// on. Its direction is fixed for its lifetime.
///
/// The client's done signal is a [`CancellationToken`]. Firing it ends the
/// client's pumps and makes every pending delivery to or from the client give
/// up. It is usually a child of a caller-provided token, so that cancelling
/// the caller cancels the client.
///
/// [`Broker::connect`]: crate::Broker::connect
pub struct Client {
    id: ClientId,
    direction: Direction,
    pub(crate) mailbox: Mailbox,
    done: CancellationToken,
    block_write: bool,
    replay: bool,
    keep_alive: bool,
    channels: DashMap<String, Arc<Channel>>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("block_write", &self.block_write)
            .field("replay", &self.replay)
            .field("keep_alive", &self.keep_alive)
            .field("done", &self.done.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Instantiate a new client with its own done signal.
    pub fn new(id: impl Into<ClientId>, direction: Direction) -> Self {
        Self {
            id: id.into(),
            direction,
            mailbox: Mailbox::new(),
            done: CancellationToken::new(),
            block_write: false,
            replay: false,
            keep_alive: false,
            channels: DashMap::new(),
        }
    }

    /// Tie the client's done signal to `parent`. Cancelling `parent` closes
    /// the client, closing the client leaves `parent` untouched.
    pub fn with_parent(mut self, parent: &CancellationToken) -> Self {
        self.done = parent.child_token();
        self
    }

    /// Block each publish until an output-capable client is present on one
    /// of this client's channels.
    pub fn with_block_write(mut self, block_write: bool) -> Self {
        self.block_write = block_write;
        self
    }

    /// Receive this client's own messages (pipes only).
    pub fn with_replay(mut self, replay: bool) -> Self {
        self.replay = replay;
        self
    }

    /// Survive the departure of the last publisher on a channel.
    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// The client's id.
    pub const fn id(&self) -> &ClientId {
        &self.id
    }

    /// The client's direction.
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Whether publishes block until a subscriber exists.
    pub const fn block_write(&self) -> bool {
        self.block_write
    }

    /// Whether the client receives its own messages.
    pub const fn replay(&self) -> bool {
        self.replay
    }

    /// Whether the client survives the loss of all publishers.
    pub const fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Close the client. Idempotent, never blocks.
    pub fn close(&self) {
        self.done.cancel();
    }

    /// True once the client has been closed.
    pub fn is_closed(&self) -> bool {
        self.done.is_cancelled()
    }

    /// A future resolving when the client is closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.done.cancelled()
    }

    pub(crate) const fn done(&self) -> &CancellationToken {
        &self.done
    }

    /// Snapshot of the channels this client is registered on.
    pub fn channels(&self) -> Vec<Arc<Channel>> {
        self.channels.iter().map(|e| e.value().clone()).collect()
    }

    /// Number of channels this client is registered on.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub(crate) fn join(&self, channel: &Arc<Channel>) {
        self.channels.insert(channel.topic().to_owned(), channel.clone());
    }

    pub(crate) fn leave(&self, topic: &str) {
        self.channels.remove(topic);
    }

    /// True if any channel of this client currently has an output-capable
    /// client registered.
    pub fn has_output_peers(&self) -> bool {
        self.channels.iter().any(|e| e.value().output_count() > 0)
    }

    /// True if a message should be handed to this client.
    pub(crate) fn accepts(&self, msg: &ChannelMessage) -> bool {
        self.direction.is_output() && (self.replay || !msg.is_from(&self.id))
    }

    /// Hand a message to this client's write pump, and wait until it has been
    /// written. Gives up when either the client or the channel is closed.
    ///
    /// Returns `true` if the message was written.
    pub async fn deliver(
        &self,
        msg: ChannelMessage,
        channel_done: &CancellationToken,
    ) -> bool {
        select! {
            biased;
            _ = self.done.cancelled() => false,
            _ = channel_done.cancelled() => false,
            delivered = self.mailbox.deliver(msg) => delivered,
        }
    }

    /// Close the client's mailbox, letting its write pump finish cleanly.
    pub(crate) fn close_mailbox(&self) {
        self.mailbox.close();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn builder_flags() {
        let client = Client::new("c", Direction::InputOutput)
            .with_block_write(true)
            .with_replay(true)
            .with_keep_alive(true);
        assert!(client.block_write());
        assert!(client.replay());
        assert!(client.keep_alive());
        assert_eq!(&**client.id(), "c");
    }

    #[test]
    fn parent_cancellation_closes_client() {
        let parent = CancellationToken::new();
        let client = Client::new("c", Direction::Output).with_parent(&parent);

        client.close();
        assert!(client.is_closed());
        assert!(!parent.is_cancelled());

        let other = Client::new("d", Direction::Output).with_parent(&parent);
        parent.cancel();
        assert!(other.is_closed());
    }

    #[test]
    fn acceptance_rules() {
        let msg = ChannelMessage::new(Bytes::new(), "me".into(), Direction::Input);

        assert!(!Client::new("other", Direction::Input).accepts(&msg));
        assert!(Client::new("other", Direction::Output).accepts(&msg));
        assert!(!Client::new("me", Direction::InputOutput).accepts(&msg));
        assert!(Client::new("me", Direction::InputOutput)
            .with_replay(true)
            .accepts(&msg));
    }

    #[tokio::test]
    async fn deliver_to_closed_client_returns() {
        let client = Client::new("c", Direction::Output);
        client.close();
        let msg = ChannelMessage::new(Bytes::new(), "p".into(), Direction::Input);
        assert!(!client.deliver(msg, &CancellationToken::new()).await);
    }
}
