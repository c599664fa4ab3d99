//! tubecast: a topic-based relay for byte streams.
//!
//! Clients connect a byte stream (a TCP connection, a local socket, an
//! in-process duplex) to one or more named topics. Publishers send whatever
//! they read from their stream to the topic, subscribers write whatever the
//! topic delivers to their stream, and pipes do both.
//!
//! ## Basic usage
//!
//! The [`pubsub::PubSub`] trait is the main entry point. It is implemented by
//! [`pubsub::Multicast`], which delivers every message to every subscriber,
//! and [`pubsub::RoundRobin`], which load balances messages across
//! subscribers.
//!
//! ```no_run
//! use tubecast::{pubsub::{Multicast, PubSub}, Channel};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn _main() {
//! let relay = Multicast::new();
//! let ctx = CancellationToken::new();
//! let (sub_stream, _sub_remote) = tokio::io::duplex(1024);
//! let (pub_stream, _pub_remote) = tokio::io::duplex(1024);
//!
//! let _sub = {
//!     let (relay, ctx) = (relay.clone(), ctx.clone());
//!     tokio::spawn(async move {
//!         relay
//!             .subscribe(&ctx, "sub", sub_stream, &[Channel::shared("hello")], false)
//!             .await
//!     })
//! };
//!
//! // Waits for the subscriber, then relays everything written to
//! // `_pub_remote` until it is dropped.
//! relay
//!     .publish(&ctx, "pub", pub_stream, &[Channel::shared("hello")], true)
//!     .await
//!     .unwrap();
//! # }
//! ```
//!
//! ## Delivery
//!
//! Every topic is a [`Channel`], owned by a [`Broker`]. Each channel runs a
//! single dispatch task, which hands messages to a [`Dispatcher`]. Hand-offs
//! are synchronous: a publisher does not read its next chunk until the
//! previous one has been written to every recipient, so a slow subscriber
//! slows its publishers down instead of buffering without bound.
//!
//! Topics are created on first use and removed once their last client
//! leaves. When a topic's last publisher leaves, its subscribers are
//! disconnected, unless they were created with [`Client::with_keep_alive`].
//!
//! ## Serving sessions
//!
//! The [`server`] module serves interactive `pub`/`sub`/`pipe` sessions over
//! TCP and local sockets. The [`cache_drain`] module runs cache invalidation
//! over the relay.
//!
//! [`Dispatcher`]: dispatch::Dispatcher

#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    unreachable_pub,
    clippy::missing_const_for_fn,
    rustdoc::all
)]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod broker;
pub use broker::{Broker, BrokerSnapshot, ChannelSnapshot};

pub mod cache_drain;

mod channel;
pub use channel::Channel;

mod client;
pub use client::Client;

pub mod config;

pub mod dispatch;
pub use dispatch::{Dispatcher, MulticastDispatcher, RoundRobinDispatcher};

mod error;
pub use error::{CommandError, PumpError, PumpResults};

mod mailbox;

mod message;
pub use message::{Action, ChannelMessage, ClientId, Direction};

pub mod pubsub;

pub mod server;

mod tasks;
pub(crate) use tasks::TaskSet;

pub mod topic;
