use crate::{
    config::SessionConfig,
    pubsub::PubSub,
    server::{
        shared::{ConnectionManager, ListenerTask},
        ServerShutdown,
    },
    TaskSet,
};
use std::{future::Future, sync::Arc};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    runtime::Handle,
};

/// Configuration objects for connecting a [`Listener`].
///
/// This object is intended to capture all connection-related configuration and
/// setup, and output only the configured [`Listener`]. This allows it to
/// configure (e.g.) authentication or other connection-oriented policies,
/// without leaking logic into the relay.
///
/// ## Implementer's guide
///
/// Implementing this trait requires either using an existing [`Listener`]
/// or implementing one manually. Implementations exist for
/// [`std::net::SocketAddr`] and [`tokio::net::TcpListener`], and for
/// [`interprocess::local_socket::ListenerOptions`] when the `ipc` feature is
/// enabled.
///
/// Sessions read their command line before joining the relay. A client that
/// never sends a newline holds its connection open without consuming relay
/// resources, but listeners exposed to untrusted networks should still apply
/// their own connection limits.
///
/// [`interprocess::local_socket::ListenerOptions`]: https://docs.rs/interprocess/latest/interprocess/local_socket/struct.ListenerOptions.html
pub trait Connect: Send + Sync + Sized {
    /// The listener type produced by the connect object.
    type Listener: Listener;

    /// The error type for instantiating a [`Listener`].
    type Error: core::error::Error + 'static;

    /// Create the listener
    fn make_listener(self) -> impl Future<Output = Result<Self::Listener, Self::Error>> + Send;

    /// Instantiate and run a task to accept connections, returning a shutdown
    /// signal. Each connection is served as an interactive session on
    /// `relay`.
    ///
    /// We do not recommend overriding this method. Doing so will opt out of
    /// the library's session task system. Users overriding this method must
    /// manually handle connection tasks.
    fn serve_on_handle<P>(
        self,
        relay: P,
        config: SessionConfig,
        handle: Handle,
    ) -> impl Future<Output = Result<ServerShutdown, Self::Error>> + Send
    where
        P: PubSub + Clone + 'static,
    {
        async move {
            let root_tasks: TaskSet = handle.into();

            ListenerTask {
                listener: self.make_listener().await?,
                manager: ConnectionManager {
                    next_id: 0,
                    relay,
                    config: Arc::new(config),
                    root_tasks: root_tasks.clone(),
                },
            }
            .spawn();
            Ok(root_tasks.into())
        }
    }

    /// Instantiate and run a task to accept connections on the current
    /// runtime, returning a shutdown signal.
    ///
    /// We do not recommend overriding this method. Doing so will opt out of
    /// the library's session task system. Users overriding this method must
    /// manually handle connection tasks.
    fn serve<P>(
        self,
        relay: P,
        config: SessionConfig,
    ) -> impl Future<Output = Result<ServerShutdown, Self::Error>> + Send
    where
        P: PubSub + Clone + 'static,
    {
        self.serve_on_handle(relay, config, Handle::current())
    }
}

/// A [`Listener`] accepts incoming connections and produces byte streams,
/// together with a description of the peer used in client ids.
pub trait Listener: Send + 'static {
    /// The stream type produced by the listener.
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;
    /// The error type for the listener.
    type Error: core::error::Error;

    /// Accept an inbound connection.
    fn accept(&self) -> impl Future<Output = Result<(Self::Stream, String), Self::Error>> + Send;
}
