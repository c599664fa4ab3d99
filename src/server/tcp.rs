use std::{io, net::SocketAddr};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

impl crate::server::Listener for TcpListener {
    type Stream = TcpStream;

    type Error = io::Error;

    async fn accept(&self) -> Result<(Self::Stream, String), Self::Error> {
        let (stream, peer) = TcpListener::accept(self).await?;
        debug!(%peer, "accepted tcp connection");
        stream.set_nodelay(true)?;
        Ok((stream, peer.to_string()))
    }
}

impl crate::server::Connect for SocketAddr {
    type Listener = TcpListener;

    type Error = io::Error;

    async fn make_listener(self) -> Result<Self::Listener, Self::Error> {
        TcpListener::bind(self).await
    }
}

/// Serve on an already bound listener, e.g. one bound to port 0.
impl crate::server::Connect for TcpListener {
    type Listener = Self;

    type Error = io::Error;

    async fn make_listener(self) -> Result<Self::Listener, Self::Error> {
        Ok(self)
    }
}
