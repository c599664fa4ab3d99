use interprocess::local_socket::{
    tokio::{Listener, Stream},
    ListenerOptions,
};
use std::io;
use tracing::debug;

/// Peer description used in client ids for local socket connections.
const LOCAL_PEER: &str = "local";

impl crate::server::Listener for Listener {
    type Stream = Stream;

    type Error = io::Error;

    async fn accept(&self) -> Result<(Self::Stream, String), Self::Error> {
        let conn = interprocess::local_socket::traits::tokio::Listener::accept(self).await?;
        debug!("accepted local socket connection");
        Ok((conn, LOCAL_PEER.to_owned()))
    }
}

impl crate::server::Connect for ListenerOptions<'_> {
    type Listener = Listener;

    type Error = io::Error;

    async fn make_listener(self) -> Result<Self::Listener, Self::Error> {
        self.create_tokio()
    }
}
