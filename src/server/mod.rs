//! Interactive sessions over TCP and local sockets.
//!
//! This module exposes a relay to end users over any byte-stream transport.
//! Built-in support is provided for TCP and IPC, and a trait system is
//! provided for custom connection types.
//!
//! ## Usage
//!
//! Typically users want to use a [`Connect`] implementor to create a server
//! using [`Connect::serve`]. This will create a [`Listener`]. [`Listener`]s
//! manage accepting client connections, and spawn a session task for each
//! connection.
//!
//! ```no_run
//! # use tubecast::{config::SessionConfig, pubsub::Multicast, server::Connect};
//! # async fn _main() {
//! let addr = std::net::SocketAddr::from(([127, 0, 0, 1], 2222));
//! let config = SessionConfig::default().with_command_prefix("nc localhost 2222");
//! // The shutdown object will stop the server when dropped.
//! let shutdown = addr.serve(Multicast::new(), config).await.unwrap();
//! # }
//! ```
//!
//! ## Sessions
//!
//! The first line a client sends is its command:
//!
//! ```text
//! help
//! ls
//! pub  [topic] [-b=<bool>] [-e] [-p] [-t <duration>]
//! sub  [topic] [-k] [-p]
//! pipe [topic] [-r] [-p]
//! ```
//!
//! Everything after the command line is the client's stream on the relay.
//! A `pub` session ends when the client closes its write half, a `sub`
//! session when the topic's last publisher leaves (unless `-k` was given),
//! and a `pipe` session when either side of the connection closes. Topics
//! are resolved with [`topic::resolve`], using the user and admin flag of
//! the [`SessionConfig`].
//!
//! #### Custom Connector
//!
//! [`Connect`] has been implemented for
//! [`interprocess::local_socket::ListenerOptions`] (producing a
//! [`interprocess::local_socket::tokio::Listener`]), for [`SocketAddr`] and
//! for [`TcpListener`] (producing a [`TcpListener`]).
//!
//! Custom [`Connect`] implementors can configure the listener in any way they
//! need. This is useful for (e.g.) configuring network or security policies on
//! the inbound connection.
//!
//! ## Internal Structure
//!
//! There are 2 tasks:
//! - `ListenerTask` - listens for new connections, accepts, and spawns a
//!   `Session` for each.
//! - `Session` - Reads the command line, then runs the command against the
//!   relay. There is 1 `Session` per connection, cancelled with the server.
//!
//! [`topic::resolve`]: crate::topic::resolve
//! [`SessionConfig`]: crate::config::SessionConfig
//! [`SocketAddr`]: std::net::SocketAddr
//! [`TcpListener`]: tokio::net::TcpListener
//! [`interprocess::local_socket::ListenerOptions`]: https://docs.rs/interprocess/latest/interprocess/local_socket/struct.ListenerOptions.html
//! [`interprocess::local_socket::tokio::Listener`]: https://docs.rs/interprocess/latest/interprocess/local_socket/tokio/enum.Listener.html

#[cfg(feature = "ipc")]
mod ipc_inner;

/// IPC support via interprocess local sockets.
#[cfg(feature = "ipc")]
pub mod ipc {
    use std::ffi::OsStr;

    pub use interprocess::local_socket::{self as local_socket, Listener, ListenerOptions, Name};

    /// Convenience function to convert an [`OsStr`] to a local socket [`Name`]
    /// in a platform-safe way.
    pub fn to_name(path: &OsStr) -> std::io::Result<local_socket::Name<'_>> {
        if cfg!(windows) && !path.as_encoded_bytes().starts_with(br"\\.\pipe\") {
            local_socket::ToNsName::to_ns_name::<local_socket::GenericNamespaced>(path)
        } else {
            local_socket::ToFsName::to_fs_name::<local_socket::GenericFilePath>(path)
        }
    }
}

mod command;
pub use command::{help_text, Command, PipeArgs, PubArgs, SubArgs};

mod session;

mod shared;
pub use shared::ConnectionId;

mod shutdown;
pub use shutdown::ServerShutdown;

mod tcp;

mod r#trait;
pub use r#trait::{Connect, Listener};
