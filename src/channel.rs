use crate::{
    mailbox::Mailbox, ChannelMessage, Client, ClientId, Direction, Dispatcher,
    MulticastDispatcher, TaskSet,
};
use core::fmt;
use dashmap::DashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, OnceLock,
};
use tokio::select;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, instrument, trace};

/// A named topic: the clients currently registered on it, an inbound
/// mailbox, and a single dispatch loop delivering inbound messages to
/// subscribers.
///
/// Callers create channels as templates and pass them to the [`Broker`]. The
/// broker keeps the first channel stored for a topic, and routes every later
/// template with the same topic to it.
///
/// [`Broker`]: crate::Broker
pub struct Channel {
    topic: String,
    clients: DashMap<ClientId, Arc<Client>>,
    mailbox: Mailbox,
    done: CancellationToken,
    dispatcher: OnceLock<Arc<dyn Dispatcher>>,
    dispatch_started: AtomicBool,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("topic", &self.topic)
            .field("clients", &self.clients.len())
            .field("dispatcher", &self.dispatcher.get())
            .field("done", &self.done.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Channel {
    /// Instantiate a new channel with no dispatcher assigned.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            clients: DashMap::new(),
            mailbox: Mailbox::new(),
            done: CancellationToken::new(),
            dispatcher: OnceLock::new(),
            dispatch_started: AtomicBool::new(false),
        }
    }

    /// Instantiate a new shared channel.
    pub fn shared(topic: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(topic))
    }

    /// Instantiate a new channel using `dispatcher`.
    pub fn with_dispatcher(topic: impl Into<String>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        let channel = Self::new(topic);
        channel.set_dispatcher(dispatcher);
        channel
    }

    /// The topic of this channel.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Assign a dispatcher if none is set yet. Returns `false` if the channel
    /// already had one, in which case `dispatcher` is discarded.
    pub fn set_dispatcher(&self, dispatcher: Arc<dyn Dispatcher>) -> bool {
        self.dispatcher.set(dispatcher).is_ok()
    }

    /// The dispatcher of this channel, if assigned.
    pub fn dispatcher(&self) -> Option<&Arc<dyn Dispatcher>> {
        self.dispatcher.get()
    }

    /// The dispatcher of this channel, assigning a [`MulticastDispatcher`] if
    /// none is set.
    fn dispatcher_or_default(&self) -> Arc<dyn Dispatcher> {
        self.dispatcher
            .get_or_init(|| Arc::new(MulticastDispatcher))
            .clone()
    }

    /// A new channel for the same topic, sharing this channel's dispatcher
    /// but none of its state.
    pub(crate) fn fresh(&self) -> Self {
        let channel = Self::new(self.topic.clone());
        if let Some(dispatcher) = self.dispatcher.get() {
            channel.set_dispatcher(dispatcher.clone());
        }
        channel
    }

    /// Snapshot of the registered clients.
    pub fn clients(&self) -> Vec<Arc<Client>> {
        self.clients.iter().map(|e| e.value().clone()).collect()
    }

    /// Number of registered clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Number of registered clients that publish.
    pub fn input_count(&self) -> usize {
        self.count_where(Direction::is_input)
    }

    /// Number of registered clients that receive.
    pub fn output_count(&self) -> usize {
        self.count_where(Direction::is_output)
    }

    fn count_where(&self, f: impl Fn(Direction) -> bool) -> usize {
        self.clients
            .iter()
            .filter(|e| f(e.value().direction()))
            .count()
    }

    /// Registered clients that should receive `msg`.
    fn subscribers_for(&self, msg: &ChannelMessage) -> Vec<Arc<Client>> {
        self.clients
            .iter()
            .filter(|e| e.value().accepts(msg))
            .map(|e| e.value().clone())
            .collect()
    }

    pub(crate) fn register(&self, client: &Arc<Client>) {
        self.clients.insert(client.id().clone(), client.clone());
    }

    pub(crate) fn deregister(&self, id: &str) {
        self.clients.remove(id);
    }

    /// Close the inbound mailbox. Messages already handed off are still
    /// dispatched, after which the mailboxes of all receiving clients are
    /// closed and the dispatch loop stops.
    pub fn close(&self) {
        if self.mailbox.close() {
            debug!(topic = %self.topic, "channel mailbox closed");
        }
    }

    /// Retire the channel, stopping its dispatch loop. Idempotent.
    pub fn cleanup(&self) {
        self.done.cancel();
    }

    /// True once the channel has been retired.
    pub fn is_retired(&self) -> bool {
        self.done.is_cancelled()
    }

    /// A future resolving when the channel is retired.
    pub fn retired(&self) -> WaitForCancellationFuture<'_> {
        self.done.cancelled()
    }

    /// Hand a message to the dispatch loop, and wait until it has been
    /// dispatched. Gives up when the sending client or the channel is closed.
    pub(crate) async fn hand_off(
        &self,
        msg: ChannelMessage,
        sender_done: &CancellationToken,
    ) -> bool {
        select! {
            biased;
            _ = sender_done.cancelled() => false,
            _ = self.done.cancelled() => false,
            delivered = self.mailbox.deliver(msg) => delivered,
        }
    }

    /// Start the dispatch loop on `tasks`, unless it is already running.
    pub(crate) fn handle(self: &Arc<Self>, tasks: &TaskSet) {
        if self.dispatch_started.swap(true, Ordering::AcqRel) {
            return;
        }
        let dispatcher = self.dispatcher_or_default();
        tasks.spawn(self.clone().dispatch_loop(dispatcher));
    }

    #[instrument(skip_all, fields(topic = %self.topic))]
    async fn dispatch_loop(self: Arc<Self>, dispatcher: Arc<dyn Dispatcher>) {
        debug!(?dispatcher, "dispatch loop started");
        let mut inbox = self.mailbox.inbox().await;

        loop {
            select! {
                biased;
                _ = self.done.cancelled() => {
                    debug!("channel retired");
                    break;
                }
                envelope = inbox.recv() => {
                    let Some(envelope) = envelope else {
                        debug!("mailbox closed, closing receivers");
                        self.clients
                            .iter()
                            .filter(|e| e.value().direction().is_output())
                            .for_each(|e| e.value().close_mailbox());
                        break;
                    };

                    let (msg, ack) = envelope.into_parts();
                    let subscribers = self.subscribers_for(&msg);
                    trace!(
                        sender = %msg.client_id,
                        len = msg.data.len(),
                        subscribers = subscribers.len(),
                        "dispatching"
                    );
                    dispatcher.dispatch(msg, subscribers, &self.done).await;
                    ack.complete();
                }
            }
        }

        self.mailbox.shutdown(&mut inbox);
        for client in self.clients() {
            client.close();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::RoundRobinDispatcher;

    #[test]
    fn dispatcher_is_fixed_once_set() {
        let channel = Channel::with_dispatcher("t", Arc::new(RoundRobinDispatcher::new()));
        assert!(!channel.set_dispatcher(Arc::new(MulticastDispatcher)));
        assert!(format!("{:?}", channel.dispatcher().unwrap()).contains("RoundRobin"));
    }

    #[test]
    fn default_dispatcher_is_multicast() {
        let channel = Channel::new("t");
        assert!(channel.dispatcher().is_none());
        let dispatcher = channel.dispatcher_or_default();
        assert!(format!("{dispatcher:?}").contains("Multicast"));
        assert!(!channel.set_dispatcher(Arc::new(RoundRobinDispatcher::new())));
    }

    #[test]
    fn fresh_keeps_dispatcher_only() {
        let channel = Channel::with_dispatcher("t", Arc::new(RoundRobinDispatcher::new()));
        channel.register(&Arc::new(Client::new("c", Direction::Output)));
        channel.cleanup();

        let fresh = channel.fresh();
        assert_eq!(fresh.topic(), "t");
        assert_eq!(fresh.client_count(), 0);
        assert!(!fresh.is_retired());
        assert!(fresh.dispatcher().is_some());
    }

    #[test]
    fn direction_counts() {
        let channel = Channel::new("t");
        channel.register(&Arc::new(Client::new("p", Direction::Input)));
        channel.register(&Arc::new(Client::new("s", Direction::Output)));
        channel.register(&Arc::new(Client::new("x", Direction::InputOutput)));

        assert_eq!(channel.client_count(), 3);
        assert_eq!(channel.input_count(), 2);
        assert_eq!(channel.output_count(), 2);

        channel.deregister("x");
        assert_eq!(channel.input_count(), 1);
        assert_eq!(channel.output_count(), 1);
    }

    #[tokio::test]
    async fn closing_mailbox_closes_receivers() {
        let tasks = TaskSet::default();
        let channel = Channel::shared("t");
        let sub = Arc::new(Client::new("s", Direction::Output));
        channel.register(&sub);
        channel.handle(&tasks);

        channel.close();
        sub.closed().await;
        assert!(sub.mailbox.is_closed());
    }
}
