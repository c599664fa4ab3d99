use crate::{
    broker::ChannelSnapshot,
    config::SessionConfig,
    pubsub::PubSub,
    server::{
        command::{help_text, Command, PipeArgs, PubArgs, SubArgs},
        ConnectionId,
    },
    topic, Broker, Channel, CommandError,
};
use std::{fmt::Write as _, sync::Arc, time::Duration};
use tokio::{
    io::{duplex, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    select,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Longest accepted command line, in bytes.
const MAX_COMMAND_LINE: u64 = 4096;

/// Name used in client ids when the session has no user.
const ANONYMOUS: &str = "anonymous";

/// One accepted connection. The first line read from the stream is the
/// command, and the rest of the stream is handed to the relay.
pub(crate) struct Session<P, S> {
    pub(crate) conn_id: ConnectionId,
    pub(crate) relay: P,
    pub(crate) config: Arc<SessionConfig>,
    pub(crate) stream: S,
    pub(crate) peer: String,
    pub(crate) token: CancellationToken,
}

impl<P, S> Session<P, S>
where
    P: PubSub,
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    /// Task future. Ends when the command is done, the connection goes away,
    /// or the server is shut down.
    #[instrument(name = "Session", skip_all, fields(conn_id = self.conn_id, peer = %self.peer))]
    pub(crate) async fn run(self) {
        let Self {
            relay,
            config,
            stream,
            peer,
            token,
            ..
        } = self;

        let mut stream = BufReader::new(stream);
        let mut line = String::new();
        let mut limited = (&mut stream).take(MAX_COMMAND_LINE);
        let read = select! {
            _ = token.cancelled() => return,
            read = limited.read_line(&mut line) => read,
        };
        drop(limited);
        if let Err(err) = read {
            debug!(%err, "failed to read command line");
            return;
        }

        let mut ctx = Ctx {
            relay: &relay,
            config: &config,
            peer: &peer,
            token: &token,
            stream,
        };

        let res = match Command::parse(&line) {
            Ok(cmd) => {
                info!(?cmd, "session command");
                ctx.dispatch(cmd).await
            }
            Err(CommandError::Empty) => ctx.print(&help_text(&config.command_prefix)).await,
            Err(err) => {
                debug!(%err, "bad command line");
                ctx.print(&format!("{err}\n")).await
            }
        };

        if let Err(err) = res {
            debug!(%err, "session stream failed");
        }
        let _ = ctx.stream.shutdown().await;
        debug!("session ended");
    }
}

/// Everything a command needs while it runs.
struct Ctx<'a, P, S> {
    relay: &'a P,
    config: &'a SessionConfig,
    peer: &'a str,
    token: &'a CancellationToken,
    stream: BufReader<S>,
}

impl<P, S> Ctx<'_, P, S>
where
    P: PubSub,
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    async fn print(&mut self, text: &str) -> std::io::Result<()> {
        self.stream.write_all(text.as_bytes()).await?;
        self.stream.flush().await
    }

    async fn dispatch(&mut self, cmd: Command) -> std::io::Result<()> {
        match cmd {
            Command::Help => self.print(&help_text(&self.config.command_prefix)).await,
            Command::Ls => self.ls().await,
            Command::Pub(args) => self.publish(args).await,
            Command::Sub(args) => self.subscribe(args).await,
            Command::Pipe(args) => self.pipe(args).await,
        }
    }

    fn client_id(&self) -> String {
        let user = self.config.user.as_deref().unwrap_or(ANONYMOUS);
        format!("{} ({user}@{})", Uuid::new_v4(), self.peer)
    }

    fn resolve(&self, requested: &str, public: bool) -> String {
        topic::resolve(self.config.user.as_deref(), requested, public, self.config.admin)
    }


    async fn ls(&mut self) -> std::io::Result<()> {
        let filter = match (&self.config.user, self.config.admin) {
            (Some(user), false) => format!("{user}/"),
            _ => String::new(),
        };

        let channels: Vec<_> = self
            .relay
            .broker()
            .snapshot()
            .channels
            .into_iter()
            .filter(|c| c.topic.starts_with(&filter))
            .collect();

        if channels.is_empty() {
            return self.print("no pubsub channels found\n").await;
        }
        self.print(&render_channels(&channels)).await
    }

    async fn publish(&mut self, args: PubArgs) -> std::io::Result<()> {
        let topic = args.topic.unwrap_or_else(|| Uuid::new_v4().to_string());
        let name = self.resolve(&topic, args.public);
        let timeout = args.timeout.unwrap_or(self.config.pub_timeout);

        let hint = subscribe_hint(&self.config.command_prefix, &topic, args.public);
        self.print(&hint).await?;
        self.print("sending msg ...\n").await?;

        if args.block && !self.has_subscriber(&name) {
            self.print(&format!(
                "no subs found ... waiting {}\n",
                humantime::format_duration(timeout)
            ))
            .await?;
            let waited =
                wait_for_subscriber(self.relay.broker(), self.token, &name, timeout).await;
            if !waited {
                return self.print("timeout reached, exiting ...\n").await;
            }
        }

        let id = self.client_id();
        let channels = [Channel::shared(name)];
        let res = if args.empty {
            // a zero-length read ends a publisher, so an empty message is a
            // single NUL byte
            let (local, mut remote) = duplex(1);
            remote.write_all(&[0]).await?;
            drop(remote);
            self.relay
                .publish(self.token, id, local, &channels, args.block)
                .await
        } else {
            self.relay
                .publish(self.token, id, &mut self.stream, &channels, args.block)
                .await
        };

        match res {
            Ok(()) => self.print("msg sent!\n").await,
            Err(err) => {
                warn!(%err, "publish failed");
                self.print(&format!("{err}\n")).await
            }
        }
    }

    fn has_subscriber(&self, name: &str) -> bool {
        self.relay
            .broker()
            .channel(name)
            .is_some_and(|c| c.output_count() > 0)
    }

    async fn subscribe(&mut self, args: SubArgs) -> std::io::Result<()> {
        let topic = args.topic.unwrap_or_else(|| Uuid::new_v4().to_string());
        let name = self.resolve(&topic, args.public);
        let id = self.client_id();
        let channels = [Channel::shared(name)];

        let res = self
            .relay
            .subscribe(self.token, id, &mut self.stream, &channels, args.keep_alive)
            .await;
        if let Err(err) = res {
            warn!(%err, "subscribe failed");
            self.print(&format!("{err}\n")).await?;
        }
        Ok(())
    }

    async fn pipe(&mut self, args: PipeArgs) -> std::io::Result<()> {
        let creator = args.topic.is_none();
        let topic = args.topic.unwrap_or_else(|| Uuid::new_v4().to_string());
        let name = self.resolve(&topic, args.public);
        if creator {
            let hint = subscribe_hint(&self.config.command_prefix, &topic, args.public);
            self.print(&hint).await?;
        }

        let id = self.client_id();
        let channels = [Channel::shared(name)];
        let res = self
            .relay
            .pipe(self.token, id, &mut self.stream, &channels, args.replay)
            .await;

        if let Err(err) = res.input {
            self.print(&format!("error reading from pipe: {err}\n")).await?;
        }
        if let Err(err) = res.output {
            self.print(&format!("error writing to pipe: {err}\n")).await?;
        }
        Ok(())
    }
}

/// How to subscribe to `topic`, printed to publishers and pipe creators.
fn subscribe_hint(command_prefix: &str, topic: &str, public: bool) -> String {
    let flag = if public { " -p" } else { "" };
    format!("subscribe to this topic:\n\t{command_prefix} sub{flag} {topic}\n")
}

/// Wait for a subscriber on `name`. Returns `false` on timeout or
/// cancellation.
async fn wait_for_subscriber(
    broker: &Broker,
    token: &CancellationToken,
    name: &str,
    timeout: Duration,
) -> bool {
    select! {
        _ = token.cancelled() => false,
        res = tokio::time::timeout(timeout, broker.wait_for_subscriber(name)) => res.is_ok(),
    }
}

fn render_clients(out: &mut String, label: &str, ids: &[String]) {
    if ids.is_empty() {
        return;
    }
    let _ = writeln!(out, "\t{label}:");
    for id in ids {
        let _ = writeln!(out, "\t- {id}");
    }
}

/// Plain text listing used by `ls`.
fn render_channels(channels: &[ChannelSnapshot]) -> String {
    let mut out = String::from("Channel Information\n");
    for channel in channels {
        let _ = writeln!(out, "- {}:", channel.topic);
        out.push_str("\tClients:\n");
        render_clients(&mut out, "Pubs", &channel.pubs);
        render_clients(&mut out, "Subs", &channel.subs);
        render_clients(&mut out, "Pipes", &channel.pipes);
    }
    out
}
