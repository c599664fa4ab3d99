//! Publish, subscribe and pipe over a [`Broker`].
//!
//! The [`PubSub`] trait is the entry point for callers holding a byte stream.
//! Each call builds a fresh [`Client`] for that stream, attaches the
//! implementation's dispatcher to every channel that does not have one yet,
//! and runs the client on the broker until the stream ends, fails, or the
//! caller's token is cancelled.
//!
//! Two implementations are provided:
//!
//! - [`Multicast`]: every subscriber receives every message.
//! - [`RoundRobin`]: every message is received by one subscriber, rotating
//!   per topic.
//!
//! ```no_run
//! # use tubecast::{pubsub::{Multicast, PubSub}, Channel};
//! # use tokio_util::sync::CancellationToken;
//! # async fn _main(stream: tokio::net::TcpStream) {
//! let relay = Multicast::new();
//! let ctx = CancellationToken::new();
//! let topic = [Channel::shared("alice/builds")];
//!
//! // Blocks until someone subscribes to "alice/builds", then forwards the
//! // stream's contents to every subscriber.
//! relay.publish(&ctx, "alice-1", stream, &topic, true).await.unwrap();
//! # }
//! ```

use crate::{
    Broker, Channel, Client, ClientId, Direction, Dispatcher, MulticastDispatcher, PumpError,
    PumpResults, RoundRobinDispatcher,
};
use std::{future::Future, sync::Arc};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    runtime::Handle,
};
use tokio_util::sync::CancellationToken;

/// A delivery policy bound to a [`Broker`].
///
/// ## Implementer's guide
///
/// Only [`PubSub::broker`] and [`PubSub::dispatcher`] are required. The
/// dispatcher is attached to a channel only if the channel has none, so the
/// first implementation to touch a topic decides its policy for the
/// topic's lifetime. Return a new dispatcher from every call when the
/// dispatcher keeps per-topic state.
pub trait PubSub: Send + Sync {
    /// The broker clients are connected to.
    fn broker(&self) -> &Broker;

    /// The dispatcher attached to channels that have none.
    fn dispatcher(&self) -> Arc<dyn Dispatcher>;

    /// Attach the dispatcher and run `client` on the broker.
    fn connect<S>(
        &self,
        client: Client,
        stream: S,
        channels: &[Arc<Channel>],
    ) -> impl Future<Output = PumpResults> + Send
    where
        S: AsyncRead + AsyncWrite + Send,
    {
        for channel in channels {
            if channel.dispatcher().is_none() {
                channel.set_dispatcher(self.dispatcher());
            }
        }
        self.broker().connect(Arc::new(client), stream, channels)
    }

    /// Connect `stream` as a bidirectional client of `channels`. Every chunk
    /// read is sent to the other clients, and every message from them is
    /// written back. With `replay`, the client also receives its own chunks.
    fn pipe<S>(
        &self,
        ctx: &CancellationToken,
        id: impl Into<ClientId>,
        stream: S,
        channels: &[Arc<Channel>],
        replay: bool,
    ) -> impl Future<Output = PumpResults> + Send
    where
        S: AsyncRead + AsyncWrite + Send,
    {
        let client = Client::new(id, Direction::InputOutput)
            .with_parent(ctx)
            .with_replay(replay);
        self.connect(client, stream, channels)
    }

    /// Connect `stream` as a publisher on `channels`, sending every chunk
    /// read until end of stream. With `block_write`, each chunk waits until
    /// one of the channels has a receiving client.
    fn publish<S>(
        &self,
        ctx: &CancellationToken,
        id: impl Into<ClientId>,
        stream: S,
        channels: &[Arc<Channel>],
        block_write: bool,
    ) -> impl Future<Output = Result<(), PumpError>> + Send
    where
        S: AsyncRead + AsyncWrite + Send,
    {
        let client = Client::new(id, Direction::Input)
            .with_parent(ctx)
            .with_block_write(block_write);
        let fut = self.connect(client, stream, channels);
        async move { fut.await.into_result() }
    }

    /// Connect `stream` as a subscriber of `channels`, writing every message
    /// received. The subscriber is closed when the last publisher on a
    /// channel leaves, unless `keep_alive` is set.
    fn subscribe<S>(
        &self,
        ctx: &CancellationToken,
        id: impl Into<ClientId>,
        stream: S,
        channels: &[Arc<Channel>],
        keep_alive: bool,
    ) -> impl Future<Output = Result<(), PumpError>> + Send
    where
        S: AsyncRead + AsyncWrite + Send,
    {
        let client = Client::new(id, Direction::Output)
            .with_parent(ctx)
            .with_keep_alive(keep_alive);
        let fut = self.connect(client, stream, channels);
        async move { fut.await.into_result() }
    }

    /// Connected publishers, across all topics.
    fn pubs(&self) -> Vec<Arc<Client>> {
        clients_with(self.broker(), Direction::Input)
    }

    /// Connected subscribers, across all topics.
    fn subs(&self) -> Vec<Arc<Client>> {
        clients_with(self.broker(), Direction::Output)
    }

    /// Connected pipes, across all topics.
    fn pipes(&self) -> Vec<Arc<Client>> {
        clients_with(self.broker(), Direction::InputOutput)
    }
}

fn clients_with(broker: &Broker, direction: Direction) -> Vec<Arc<Client>> {
    broker
        .clients()
        .into_iter()
        .filter(|c| c.direction() == direction)
        .collect()
}

/// Fan every message out to every subscriber of its topic.
#[derive(Debug, Clone, Default)]
pub struct Multicast {
    broker: Broker,
}

impl Multicast {
    /// Instantiate a relay with its own broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate a relay whose broker runs on `handle`.
    pub fn with_handle(handle: Handle) -> Self {
        Self::from(Broker::with_handle(handle))
    }
}

impl From<Broker> for Multicast {
    fn from(broker: Broker) -> Self {
        Self { broker }
    }
}

impl PubSub for Multicast {
    fn broker(&self) -> &Broker {
        &self.broker
    }

    fn dispatcher(&self) -> Arc<dyn Dispatcher> {
        Arc::new(MulticastDispatcher)
    }
}

/// Load balance messages across the subscribers of each topic.
#[derive(Debug, Clone, Default)]
pub struct RoundRobin {
    broker: Broker,
}

impl RoundRobin {
    /// Instantiate a relay with its own broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate a relay whose broker runs on `handle`.
    pub fn with_handle(handle: Handle) -> Self {
        Self::from(Broker::with_handle(handle))
    }
}

impl From<Broker> for RoundRobin {
    fn from(broker: Broker) -> Self {
        Self { broker }
    }
}

impl PubSub for RoundRobin {
    fn broker(&self) -> &Broker {
        &self.broker
    }

    fn dispatcher(&self) -> Arc<dyn Dispatcher> {
        // one rotation counter per topic
        Arc::new(RoundRobinDispatcher::new())
    }
}
