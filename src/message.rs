use bytes::Bytes;
use core::fmt;
use serde::Serialize;
use std::sync::Arc;

/// Identifier of a [`Client`]. Unique per connection attempt, and cheap to
/// clone into every message the client produces.
///
/// [`Client`]: crate::Client
pub type ClientId = Arc<str>;

/// Which way data flows between a client's stream and its channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Reads from the stream and publishes. Never receives.
    Input,
    /// Receives and writes to the stream. Never publishes.
    Output,
    /// Both. Used by pipes.
    InputOutput,
}

impl Direction {
    /// True if clients with this direction run a read pump.
    pub const fn is_input(self) -> bool {
        matches!(self, Self::Input | Self::InputOutput)
    }

    /// True if clients with this direction run a write pump.
    pub const fn is_output(self) -> bool {
        matches!(self, Self::Output | Self::InputOutput)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::InputOutput => "inputoutput",
        };
        f.write_str(s)
    }
}

/// What a [`ChannelMessage`] asks the recipient to do.
///
/// Only [`Action::Data`] is produced today. [`Action::Close`] is reserved for
/// half-close signalling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Deliver the payload.
    #[default]
    Data,
    /// The sender is done.
    Close,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data => f.write_str("data"),
            Self::Close => f.write_str("close"),
        }
    }
}

/// One chunk of data travelling from a publisher to its channels.
///
/// Cloning is cheap, the payload is reference counted and shared by every
/// recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    /// The payload.
    pub data: Bytes,
    /// The client that read the payload from its stream.
    pub client_id: ClientId,
    /// Direction of the hop that produced the message.
    pub direction: Direction,
    /// Requested action.
    pub action: Action,
}

impl ChannelMessage {
    /// Instantiate a new data message.
    pub const fn new(data: Bytes, client_id: ClientId, direction: Direction) -> Self {
        Self {
            data,
            client_id,
            direction,
            action: Action::Data,
        }
    }

    /// True if the message was produced by the client with this id.
    pub fn is_from(&self, id: &str) -> bool {
        *self.client_id == *id
    }
}
