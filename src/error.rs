use std::io;

/// Errors that end a client's participation in the relay.
///
/// End of stream is not an error, and neither is publishing to a topic with
/// no subscribers.
#[derive(thiserror::Error, Debug)]
pub enum PumpError {
    /// Reading from the client's stream failed.
    #[error("failed to read from client stream: {0}")]
    Read(#[source] io::Error),
    /// Writing to the client's stream failed.
    #[error("failed to write to client stream: {0}")]
    Write(#[source] io::Error),
    /// Both directions of the client's stream failed.
    #[error("failed to read from client stream: {read}; failed to write to client stream: {write}")]
    ReadWrite {
        /// The read error.
        read: io::Error,
        /// The write error.
        write: io::Error,
    },
}

/// Outcome of both pumps of a client, as returned by [`Broker::connect`].
///
/// [`Broker::connect`]: crate::Broker::connect
#[derive(Debug)]
#[must_use = "pump results may contain stream errors"]
pub struct PumpResults {
    /// Result of the read pump. `Ok` if the client never read.
    pub input: io::Result<()>,
    /// Result of the write pump. `Ok` if the client never wrote.
    pub output: io::Result<()>,
}

impl Default for PumpResults {
    fn default() -> Self {
        Self {
            input: Ok(()),
            output: Ok(()),
        }
    }
}

impl PumpResults {
    /// True if neither pump failed.
    pub const fn is_ok(&self) -> bool {
        self.input.is_ok() && self.output.is_ok()
    }

    /// Join both results into one.
    pub fn into_result(self) -> Result<(), PumpError> {
        match (self.input, self.output) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(read), Ok(())) => Err(PumpError::Read(read)),
            (Ok(()), Err(write)) => Err(PumpError::Write(write)),
            (Err(read), Err(write)) => Err(PumpError::ReadWrite { read, write }),
        }
    }
}

/// Errors produced while parsing an interactive command line.
#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    /// The command line was empty.
    #[error("no command given")]
    Empty,
    /// The command is not one of `help`, `ls`, `pub`, `sub` or `pipe`.
    #[error("unknown command: {0}")]
    Unknown(String),
    /// The arguments did not parse.
    #[error(transparent)]
    Args(#[from] clap::Error),
}
