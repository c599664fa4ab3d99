#![allow(dead_code)]

use std::{future::Future, time::Duration};
use tokio::{
    io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream, WriteHalf},
    task::JoinHandle,
    time,
};
use tubecast::{Broker, Channel};

/// Buffer size of the in-memory streams used by tests.
pub const STREAM_CAPACITY: usize = 64 * 1024;

/// A publisher stream that yields `data`, then end of stream.
pub async fn publisher(data: &[u8]) -> DuplexStream {
    let (local, mut remote) = duplex(STREAM_CAPACITY);
    remote.write_all(data).await.unwrap();
    local
}

/// A subscriber stream, and a task collecting everything written to it until
/// the relay drops it.
pub fn subscriber() -> (DuplexStream, JoinHandle<Vec<u8>>) {
    let (local, mut remote) = duplex(STREAM_CAPACITY);
    let collected = tokio::spawn(async move {
        let mut buf = Vec::new();
        remote.read_to_end(&mut buf).await.unwrap();
        buf
    });
    (local, collected)
}

/// A pipe stream. Returns the stream handed to the relay, the half used to
/// write into it, and a task collecting everything the relay writes back.
pub fn pipe() -> (
    DuplexStream,
    WriteHalf<DuplexStream>,
    JoinHandle<Vec<u8>>,
) {
    let (local, remote) = duplex(STREAM_CAPACITY);
    let (mut read, write) = tokio::io::split(remote);
    let collected = tokio::spawn(async move {
        let mut buf = Vec::new();
        read.read_to_end(&mut buf).await.unwrap();
        buf
    });
    (local, write, collected)
}

/// Wait until `cond` holds, panicking after 5 seconds.
pub async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(time::Instant::now() < deadline, "timed out waiting for {what}");
        time::sleep(Duration::from_millis(5)).await;
    }
}

/// Await `fut`, panicking after 5 seconds.
pub async fn within<F: Future>(what: &str, fut: F) -> F::Output {
    time::timeout(Duration::from_secs(5), fut)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

/// Number of output-capable clients on `topic`.
pub fn outputs(broker: &Broker, topic: &str) -> usize {
    broker.channel(topic).map_or(0, |c| c.output_count())
}

/// Number of input-capable clients on `topic`.
pub fn inputs(broker: &Broker, topic: &str) -> usize {
    broker.channel(topic).map_or(0, |c| c.input_count())
}

/// A one-element channel list for `topic`.
pub fn topic(topic: &str) -> [std::sync::Arc<Channel>; 1] {
    [Channel::shared(topic)]
}

/// Install a debug level log subscriber writing through the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
