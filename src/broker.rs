use crate::{Channel, ChannelMessage, Client, ClientId, Direction, PumpResults, TaskSet};
use bytes::BytesMut;
use dashmap::{mapref::entry::Entry, DashMap};
use futures_util::future::join_all;
use serde::Serialize;
use std::{collections::HashMap, io, sync::Arc};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    runtime::Handle,
    select,
    sync::Notify,
};
use tracing::{debug, instrument, trace, warn};

/// Default maximum size of a single read from a publishing client's stream.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 32 * 1024;

/// The registry of live [`Channel`]s, and the single place where clients are
/// wired to them.
///
/// A broker is a cheap handle. Clones share the same topics.
///
/// ## Lifecycle
///
/// A topic exists from the first time a client references it until a
/// [`Broker::cleanup`] pass finds it empty. Each topic runs one dispatch task
/// on the broker's task set. [`Broker::shutdown`] stops all of them.
#[derive(Debug, Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
    read_buffer_size: usize,
}

#[derive(Debug)]
struct BrokerInner {
    channels: DashMap<String, Arc<Channel>>,
    /// Fired on every client registration.
    registered: Notify,
    tasks: TaskSet,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    /// Instantiate a new broker. Dispatch tasks are spawned on the runtime
    /// that is current when a topic is first used.
    pub fn new() -> Self {
        Self::with_tasks(TaskSet::default())
    }

    /// Instantiate a new broker whose dispatch tasks run on `handle`.
    pub fn with_handle(handle: Handle) -> Self {
        Self::with_tasks(handle.into())
    }

    fn with_tasks(tasks: TaskSet) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                channels: DashMap::new(),
                registered: Notify::new(),
                tasks,
            }),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    /// Set the maximum size of a single read from a publishing client
    /// connected through this handle. Zero is treated as one.
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// The maximum size of a single read from a publishing client.
    pub const fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    /// Snapshot of all live channels.
    pub fn channels(&self) -> Vec<Arc<Channel>> {
        self.inner
            .channels
            .iter()
            .map(|e| e.value().clone())
            .collect()
    }

    /// The live channel for `topic`, if any.
    pub fn channel(&self, topic: &str) -> Option<Arc<Channel>> {
        self.inner.channels.get(topic).map(|e| e.value().clone())
    }

    /// Snapshot of all connected clients, across all channels. A client on
    /// several channels is listed once.
    pub fn clients(&self) -> Vec<Arc<Client>> {
        let mut seen = HashMap::<ClientId, Arc<Client>>::new();
        for channel in self.channels() {
            for client in channel.clients() {
                seen.entry(client.id().clone()).or_insert(client);
            }
        }
        seen.into_values().collect()
    }

    /// Serializable listing of every topic and its clients.
    pub fn snapshot(&self) -> BrokerSnapshot {
        let mut channels: Vec<_> = self
            .channels()
            .iter()
            .map(|c| ChannelSnapshot::from(c.as_ref()))
            .collect();
        channels.sort_by(|a, b| a.topic.cmp(&b.topic));
        BrokerSnapshot { channels }
    }

    /// Wait until `topic` has at least one output-capable client.
    pub async fn wait_for_subscriber(&self, topic: &str) {
        loop {
            let notified = self.inner.registered.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self
                .channel(topic)
                .is_some_and(|channel| channel.output_count() > 0)
            {
                return;
            }
            notified.await;
        }
    }

    /// Close every connected client and stop every dispatch task.
    pub fn shutdown(&self) {
        for channel in self.channels() {
            channel.clients().iter().for_each(|c| c.close());
            channel.cleanup();
        }
        self.inner.tasks.cancel();
    }

    /// Retire and remove every channel that has no clients left.
    pub fn cleanup(&self) {
        self.inner.channels.retain(|topic, channel| {
            if channel.client_count() > 0 {
                return true;
            }
            debug!(%topic, "retiring empty channel");
            channel.cleanup();
            false
        });
    }

    /// Register `client` on the live channel for `template`'s topic, creating
    /// it from the template if needed, and start its dispatch loop.
    ///
    /// Registration happens under the topic's map entry, so a concurrent
    /// [`Self::cleanup`] cannot retire the channel in between.
    fn ensure_channel(&self, client: &Arc<Client>, template: &Arc<Channel>) -> Arc<Channel> {
        let channel = match self.inner.channels.entry(template.topic().to_owned()) {
            Entry::Occupied(entry) => {
                let channel = entry.get().clone();
                if let Some(dispatcher) = template.dispatcher() {
                    channel.set_dispatcher(dispatcher.clone());
                }
                channel.register(client);
                channel
            }
            Entry::Vacant(entry) => {
                let channel = if template.is_retired() {
                    Arc::new(template.fresh())
                } else {
                    template.clone()
                };
                debug!(topic = %channel.topic(), "creating channel");
                channel.register(client);
                entry.insert(channel.clone());
                channel
            }
        };

        client.join(&channel);
        channel.handle(&self.inner.tasks);
        channel
    }

    /// Wire `client` to every channel in `channels`, pump its stream until
    /// end of stream, an error, or cancellation, then tear everything down.
    ///
    /// Input-capable clients read up to the broker's read buffer size at a
    /// time and hand every chunk to all of their channels, waiting for those
    /// hand-offs before reading again. Output-capable clients write every
    /// message delivered to them. Both pumps run until they finish, and the
    /// client is removed from every channel before this returns.
    #[instrument(
        skip_all,
        fields(client = %client.id(), direction = %client.direction())
    )]
    pub async fn connect<S>(
        &self,
        client: Arc<Client>,
        stream: S,
        channels: &[Arc<Channel>],
    ) -> PumpResults
    where
        S: AsyncRead + AsyncWrite + Send,
    {
        let mut memberships = Vec::with_capacity(channels.len());
        for template in channels {
            let channel = self.ensure_channel(&client, template);
            memberships.push(Membership {
                broker: self,
                client: client.clone(),
                channel,
            });
        }
        self.inner.registered.notify_waiters();
        debug!(channels = memberships.len(), "client connected");

        let (reader, writer) = tokio::io::split(stream);
        let (input, output) = tokio::join!(
            self.input_pump(&client, reader),
            output_pump(&client, writer),
        );

        if let Err(err) = &input {
            warn!(%err, "read pump failed");
        }
        if let Err(err) = &output {
            warn!(%err, "write pump failed");
        }

        drop(memberships);
        debug!("client disconnected");
        PumpResults { input, output }
    }

    /// Read from the client's stream and hand every chunk to its channels.
    /// The client is closed once reading stops.
    async fn input_pump<R>(&self, client: &Client, reader: R) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
    {
        if !client.direction().is_input() {
            return Ok(());
        }
        let res = self.read_loop(client, reader).await;
        client.close();
        res
    }

    async fn read_loop<R>(&self, client: &Client, mut reader: R) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let mut buf = BytesMut::with_capacity(self.read_buffer_size);
            let read = select! {
                biased;
                _ = client.closed() => return Ok(()),
                read = reader.read_buf(&mut buf) => read?,
            };
            if read == 0 {
                trace!("end of stream");
                return Ok(());
            }

            if client.block_write() {
                self.wait_for_output(client).await;
            }

            let msg = ChannelMessage::new(buf.freeze(), client.id().clone(), Direction::Input);
            let channels = client.channels();
            trace!(len = read, channels = channels.len(), "publishing");

            join_all(
                channels
                    .iter()
                    .map(|channel| channel.hand_off(msg.clone(), client.done())),
            )
            .await;
        }
    }

    /// Wait until one of the client's channels has an output-capable client,
    /// or the client is closed.
    async fn wait_for_output(&self, client: &Client) {
        loop {
            let notified = self.inner.registered.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if client.has_output_peers() {
                return;
            }
            trace!("waiting for a subscriber");

            select! {
                _ = client.closed() => return,
                _ = notified => {}
            }
        }
    }
}

/// Write every message delivered to the client to its stream. The client is
/// closed once writing stops.
async fn output_pump<W>(client: &Client, writer: W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if !client.direction().is_output() {
        return Ok(());
    }
    let res = write_loop(client, writer).await;
    client.close();
    res
}

async fn write_loop<W>(client: &Client, mut writer: W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut inbox = client.mailbox.inbox().await;
    let res = loop {
        let envelope = select! {
            biased;
            _ = client.closed() => break Ok(()),
            envelope = inbox.recv() => envelope,
        };
        let Some(envelope) = envelope else {
            trace!("mailbox closed");
            break Ok(());
        };

        let (msg, ack) = envelope.into_parts();
        let written = select! {
            biased;
            _ = client.closed() => break Ok(()),
            written = async {
                writer.write_all(&msg.data).await?;
                writer.flush().await
            } => written,
        };
        if let Err(err) = written {
            break Err(err);
        }
        ack.complete();
    };

    client.mailbox.shutdown(&mut inbox);
    res
}

/// Membership of one client on one channel, for the duration of a
/// [`Broker::connect`] call. Dropping it removes the client from the channel
/// and sweeps up after it.
struct Membership<'a> {
    broker: &'a Broker,
    client: Arc<Client>,
    channel: Arc<Channel>,
}

impl Drop for Membership<'_> {
    fn drop(&mut self) {
        let Self {
            broker,
            client,
            channel,
        } = self;

        client.leave(channel.topic());
        channel.deregister(client.id());

        if client.channel_count() == 0 {
            client.close();
        }

        // An abandoned topic drops its passive listeners.
        if channel.input_count() == 0 {
            channel
                .clients()
                .iter()
                .filter(|c| !c.keep_alive())
                .for_each(|c| c.close());
        }

        broker.cleanup();
    }
}

/// Listing of one topic and the ids of its clients, by direction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelSnapshot {
    /// The topic.
    pub topic: String,
    /// Publishing clients.
    pub pubs: Vec<String>,
    /// Receiving clients.
    pub subs: Vec<String>,
    /// Bidirectional clients.
    pub pipes: Vec<String>,
}

impl From<&Channel> for ChannelSnapshot {
    fn from(channel: &Channel) -> Self {
        let mut snapshot = Self {
            topic: channel.topic().to_owned(),
            ..Default::default()
        };
        for client in channel.clients() {
            let id = client.id().to_string();
            match client.direction() {
                Direction::Input => snapshot.pubs.push(id),
                Direction::Output => snapshot.subs.push(id),
                Direction::InputOutput => snapshot.pipes.push(id),
            }
        }
        snapshot.pubs.sort();
        snapshot.subs.sort();
        snapshot.pipes.sort();
        snapshot
    }
}

/// Listing of every live topic, sorted by topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BrokerSnapshot {
    /// The topics.
    pub channels: Vec<ChannelSnapshot>,
}

impl BrokerSnapshot {
    /// Render the listing as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;
    use tokio::io::duplex;

    #[tokio::test]
    async fn concurrent_first_touch_creates_one_channel() {
        let broker = Broker::new();
        let template_a = Channel::shared("topic");
        let template_b = Channel::shared("topic");

        let a = Arc::new(Client::new("a", Direction::Output));
        let b = Arc::new(Client::new("b", Direction::Output));

        let first = broker.ensure_channel(&a, &template_a);
        let second = broker.ensure_channel(&b, &template_b);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(broker.channels().len(), 1);
        assert_eq!(first.client_count(), 2);
        broker.shutdown();
    }

    #[tokio::test]
    async fn retired_template_is_replaced() {
        let broker = Broker::new();
        let template = Channel::shared("topic");
        template.cleanup();

        let client = Arc::new(Client::new("a", Direction::Output));
        let channel = broker.ensure_channel(&client, &template);

        assert!(!Arc::ptr_eq(&channel, &template));
        assert!(!channel.is_retired());
        broker.shutdown();
    }

    #[tokio::test]
    async fn cleanup_removes_only_empty_channels() {
        let broker = Broker::new();
        let client = Arc::new(Client::new("a", Direction::Output));
        let busy = broker.ensure_channel(&client, &Channel::shared("busy"));

        let idle = Channel::shared("idle");
        broker.inner.channels.insert("idle".into(), idle.clone());

        broker.cleanup();
        assert!(broker.channel("busy").is_some());
        assert!(broker.channel("idle").is_none());
        assert!(idle.is_retired());
        assert!(!busy.is_retired());
        broker.shutdown();
    }

    #[tokio::test]
    async fn pipe_relays_between_streams() {
        let broker = Broker::new();
        let channel = Channel::shared("pipe");

        let (a_local, mut a_remote) = duplex(64);
        let (b_local, mut b_remote) = duplex(64);

        let a = Arc::new(Client::new("a", Direction::InputOutput));
        let b = Arc::new(Client::new("b", Direction::InputOutput));

        let a_task = {
            let broker = broker.clone();
            let channels = vec![channel.clone()];
            let a = a.clone();
            tokio::spawn(async move { broker.connect(a, a_local, &channels).await })
        };
        let b_task = {
            let broker = broker.clone();
            let channels = vec![channel.clone()];
            let b = b.clone();
            tokio::spawn(async move { broker.connect(b, b_local, &channels).await })
        };

        while channel.client_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        a_remote.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        b_remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        b_remote.write_all(b"pong").await.unwrap();
        a_remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        a.close();
        b.close();
        assert!(a_task.await.unwrap().is_ok());
        assert!(b_task.await.unwrap().is_ok());
        assert!(broker.channels().is_empty());
    }

    #[tokio::test]
    async fn snapshot_groups_by_direction() {
        let broker = Broker::new();
        let channel = Channel::shared("t");
        for (id, direction) in [
            ("p", Direction::Input),
            ("s2", Direction::Output),
            ("s1", Direction::Output),
            ("x", Direction::InputOutput),
        ] {
            broker.ensure_channel(&Arc::new(Client::new(id, direction)), &channel);
        }

        let snapshot = broker.snapshot();
        let json: serde_json::Value = serde_json::from_str(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(json["channels"][0]["subs"][1], "s2");
        assert_eq!(
            snapshot.channels,
            vec![ChannelSnapshot {
                topic: "t".into(),
                pubs: vec!["p".into()],
                subs: vec!["s1".into(), "s2".into()],
                pipes: vec!["x".into()],
            }]
        );
        broker.shutdown();
    }

    #[tokio::test]
    async fn wait_for_subscriber_wakes_on_registration() {
        let broker = Broker::new();
        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.wait_for_subscriber("t").await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        let sub = Arc::new(Client::new("s", Direction::Output));
        let (local, _remote) = duplex(8);
        let connect = {
            let broker = broker.clone();
            let sub = sub.clone();
            tokio::spawn(async move { broker.connect(sub, local, &[Channel::shared("t")]).await })
        };

        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("subscriber never observed")
            .unwrap();

        sub.close();
        assert!(connect.await.unwrap().is_ok());
    }
}
