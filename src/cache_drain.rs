//! Cache invalidation over the [`CACHE_DRAIN`] topic.
//!
//! Storage writers enqueue surrogate keys on a [`PurgeQueue`], which
//! periodically publishes them, one per line, onto the topic. HTTP caches run
//! a [`CacheDrain`], a keep-alive subscriber that hands every key to a
//! [`Purger`]. The sentinel [`PURGE_ALL`] asks for everything to be dropped.
//!
//! Both sides connect to the relay in-process, through a duplex stream.

use crate::{
    config::{DEFAULT_FLUSH_INTERVAL, DEFAULT_READ_BUFFER_SIZE},
    pubsub::PubSub,
    topic::{CACHE_DRAIN, PURGE_ALL},
    Channel, PumpError,
};
use dashmap::DashSet;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{
    io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader},
    select,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_stream::{wrappers::LinesStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

/// Delay before a [`CacheDrain`] resubscribes after losing its subscription.
const RESUBSCRIBE_DELAY: Duration = Duration::from_millis(100);

/// Something that can evict cached entries by surrogate key.
pub trait Purger: Send + Sync {
    /// Evict every entry tagged with `key`.
    fn purge(&self, key: &str) -> impl Future<Output = ()> + Send;

    /// Evict every entry.
    fn purge_all(&self) -> impl Future<Output = ()> + Send;
}

/// De-duplicating queue of surrogate keys waiting to be published.
///
/// Clones share the same queue.
#[derive(Debug, Clone, Default)]
pub struct PurgeQueue {
    pending: Arc<DashSet<String>>,
}

impl PurgeQueue {
    /// Instantiate an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `key` for the next flush. Keys already pending are not queued
    /// twice.
    pub fn enqueue(&self, key: impl Into<String>) {
        let key = key.into();
        trace!(%key, "queueing purge");
        self.pending.insert(key);
    }

    /// Queue a purge of everything.
    pub fn purge_all(&self) {
        self.enqueue(PURGE_ALL);
    }

    /// Number of pending keys.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True if no key is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Remove and return every pending key.
    fn take(&self) -> Vec<String> {
        let keys: Vec<String> = self.pending.iter().map(|k| k.key().clone()).collect();
        keys.into_iter()
            .filter_map(|k| self.pending.remove(&k))
            .collect()
    }

    /// Publish pending keys onto [`CACHE_DRAIN`] every
    /// [`DEFAULT_FLUSH_INTERVAL`], until `ctx` is cancelled.
    pub async fn run<P: PubSub>(&self, relay: &P, ctx: &CancellationToken) -> Result<(), PumpError> {
        self.run_every(relay, ctx, DEFAULT_FLUSH_INTERVAL).await
    }

    /// Publish pending keys onto [`CACHE_DRAIN`] every `period`, until `ctx`
    /// is cancelled. Publishing never waits for a subscriber, so keys flushed
    /// while no cache is listening are lost.
    #[instrument(skip_all, fields(period = ?period))]
    pub async fn run_every<P: PubSub>(
        &self,
        relay: &P,
        ctx: &CancellationToken,
        period: Duration,
    ) -> Result<(), PumpError> {
        let (local, mut remote) = duplex(DEFAULT_READ_BUFFER_SIZE);
        let channels = [Channel::shared(CACHE_DRAIN)];

        let id = format!("purge-queue-{}", Uuid::new_v4());
        let publish = relay.publish(ctx, id, local, &channels, false);
        let flush = async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                select! {
                    _ = ctx.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                for key in self.take() {
                    debug!(%key, "publishing purge");
                    if let Err(err) = remote.write_all(format!("{key}\n").as_bytes()).await {
                        warn!(%err, "purge publisher went away");
                        return;
                    }
                }
            }
            // dropping the stream ends the publisher
        };

        let (res, ()) = tokio::join!(publish, flush);
        res
    }
}

/// Keep-alive subscriber on [`CACHE_DRAIN`], feeding a [`Purger`].
#[derive(Debug, Clone)]
pub struct CacheDrain<T> {
    purger: T,
}

impl<T: Purger> CacheDrain<T> {
    /// Instantiate a drain feeding `purger`.
    pub const fn new(purger: T) -> Self {
        Self { purger }
    }

    /// The purger fed by this drain.
    pub const fn purger(&self) -> &T {
        &self.purger
    }

    /// Consume purge requests until `ctx` is cancelled, resubscribing if the
    /// subscription ends early.
    #[instrument(skip_all)]
    pub async fn run<P: PubSub>(&self, relay: &P, ctx: &CancellationToken) {
        while !ctx.is_cancelled() {
            if let Err(err) = self.run_once(relay, ctx).await {
                warn!(%err, "cache drain subscription failed");
            }
            select! {
                _ = ctx.cancelled() => break,
                _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => debug!("resubscribing"),
            }
        }
    }

    /// Subscribe once, consuming purge requests until the subscription ends.
    async fn run_once<P: PubSub>(
        &self,
        relay: &P,
        ctx: &CancellationToken,
    ) -> Result<(), PumpError> {
        let (local, remote) = duplex(DEFAULT_READ_BUFFER_SIZE);
        let channels = [Channel::shared(CACHE_DRAIN)];

        let id = format!("cache-drain-{}", Uuid::new_v4());
        let subscribe = relay.subscribe(ctx, id, local, &channels, true);
        let consume = async move {
            let mut lines = LinesStream::new(BufReader::new(remote).lines());
            while let Some(line) = lines.next().await {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        warn!(%err, "failed to read purge request");
                        break;
                    }
                };
                self.handle_line(&line).await;
            }
        };

        let (res, ()) = tokio::join!(subscribe, consume);
        res
    }

    async fn handle_line(&self, line: &str) {
        let key = line.trim();
        if key.is_empty() {
            return;
        }
        info!(%key, "received cache-drain item");
        if key == PURGE_ALL {
            self.purger.purge_all().await;
        } else {
            self.purger.purge(key).await;
        }
    }
}
