use crate::CommandError;
use clap::{ArgAction, Parser};
use std::{str::FromStr, time::Duration};

/// Usage text printed by `help`, or for an empty command line.
pub fn help_text(command_prefix: &str) -> String {
    format!(
        "Command: {command_prefix} <help | ls | pub | sub | pipe> <topic> [-h | args...]

Send messages through named topics. Topics are private to the connected
user unless made public with -p. Every publisher (\"pub\") sends its
messages to every subscriber (\"sub\") of the topic, and by default waits
until at least one subscriber is connected. Pipes (\"pipe\") exchange
messages in both directions between all clients of a topic.

Think of each command in terms of where the data goes:

- pub  => from you to the topic
- sub  => from the topic to you
- pipe => both ways
"
    )
}

/// A parsed session command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print usage.
    Help,
    /// List visible topics and their clients.
    Ls,
    /// Publish the session stream.
    Pub(PubArgs),
    /// Subscribe the session stream.
    Sub(SubArgs),
    /// Pipe the session stream in both directions.
    Pipe(PipeArgs),
}

impl Command {
    /// Parse a command line. Words are separated by whitespace, and the
    /// first word selects the command.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut words = line.split_whitespace();
        let Some(cmd) = words.next() else {
            return Err(CommandError::Empty);
        };

        match cmd {
            "help" => Ok(Self::Help),
            "ls" => Ok(Self::Ls),
            "pub" => Ok(Self::Pub(PubArgs::try_parse_from(words)?)),
            "sub" => Ok(Self::Sub(SubArgs::try_parse_from(words)?)),
            "pipe" => Ok(Self::Pipe(PipeArgs::try_parse_from(words)?)),
            other => Err(CommandError::Unknown(other.to_owned())),
        }
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Arguments of `pub`.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "pub", no_binary_name = true, disable_version_flag = true)]
pub struct PubArgs {
    /// Topic to publish to. A random topic is created if omitted.
    pub topic: Option<String>,

    /// Block writes until a subscriber is available.
    #[arg(
        short = 'b',
        action = ArgAction::Set,
        default_value_t = true,
        default_missing_value = "true",
        num_args = 0..=1,
        require_equals = true
    )]
    pub block: bool,

    /// Send an empty message to subscribers instead of reading input.
    #[arg(short = 'e')]
    pub empty: bool,

    /// Anyone can subscribe to this topic.
    #[arg(short = 'p')]
    pub public: bool,

    /// How long to wait for a subscriber, e.g. "30s" or "2h".
    #[arg(short = 't', value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,
}

/// Arguments of `sub`.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "sub", no_binary_name = true, disable_version_flag = true)]
pub struct SubArgs {
    /// Topic to subscribe to.
    pub topic: Option<String>,

    /// Keep the subscription alive after all publishers have left.
    #[arg(short = 'k')]
    pub keep_alive: bool,

    /// Subscribe to a public topic.
    #[arg(short = 'p')]
    pub public: bool,
}

/// Arguments of `pipe`.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "pipe", no_binary_name = true, disable_version_flag = true)]
pub struct PipeArgs {
    /// Topic to pipe through. A random topic is created if omitted.
    pub topic: Option<String>,

    /// Also receive your own messages.
    #[arg(short = 'r')]
    pub replay: bool,

    /// Pipe through a public topic.
    #[arg(short = 'p')]
    pub public: bool,
}
