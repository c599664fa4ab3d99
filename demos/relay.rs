//! Serve a relay over TCP.
//!
//! ```sh
//! cargo run --example relay -- 127.0.0.1:2222
//! # in another terminal, subscribe
//! nc 127.0.0.1 2222
//! sub builds
//! # and in a third, publish
//! (echo pub builds; echo hello) | nc -N 127.0.0.1 2222
//! ```

use std::net::SocketAddr;
use tubecast::{config::SessionConfig, pubsub::Multicast, server::Connect};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let addr: SocketAddr = std::env::args()
        .nth(1)
        .as_deref()
        .unwrap_or("127.0.0.1:2222")
        .parse()?;

    let config = SessionConfig::default().with_command_prefix(format!("nc {addr}"));
    let relay: Multicast = config.relay();

    let shutdown = addr.serve(relay, config).await?;
    tracing::info!(%addr, "relay listening");

    tokio::signal::ctrl_c().await?;
    shutdown.shutdown().await;
    Ok(())
}
