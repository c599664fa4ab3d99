//! Delivery strategies.
//!
//! A [`Dispatcher`] decides which of a channel's current subscribers receive
//! a given message. Each [`Channel`] runs exactly one dispatcher, fixed the
//! first time one is assigned, so every client on a topic sees the same
//! delivery policy.
//!
//! - [`MulticastDispatcher`] hands every message to every subscriber.
//! - [`RoundRobinDispatcher`] hands every message to exactly one subscriber,
//!   rotating through them.
//!
//! [`Channel`]: crate::Channel

use crate::{ChannelMessage, Client};
use core::fmt;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod multicast;
pub use multicast::MulticastDispatcher;

mod round_robin;
pub use round_robin::RoundRobinDispatcher;

/// Chooses the recipients of a message.
///
/// ## Implementer's guide
///
/// `subscribers` holds the eligible clients at the instant the message was
/// taken off the channel mailbox. Hand the message to a client with
/// [`Client::deliver`] semantics: every attempt must race against the
/// client's own done signal and `channel_done`, so that a dead subscriber or
/// a retired channel never wedges the dispatch loop.
///
/// The returned future resolves with the number of subscribers that accepted
/// the message. Returning `0` is not an error.
pub trait Dispatcher: fmt::Debug + Send + Sync + 'static {
    /// Send `msg` to the appropriate subscriber(s).
    fn dispatch<'a>(
        &'a self,
        msg: ChannelMessage,
        subscribers: Vec<Arc<Client>>,
        channel_done: &'a CancellationToken,
    ) -> BoxFuture<'a, usize>;
}
