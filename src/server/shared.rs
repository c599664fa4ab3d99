use crate::{
    config::SessionConfig,
    pubsub::PubSub,
    server::{session::Session, Listener},
    TaskSet,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Type alias for identifying connections.
pub type ConnectionId = u64;

/// The `ListenerTask` listens for new connections, and spawns a [`Session`]
/// for each.
pub(crate) struct ListenerTask<T: Listener, P> {
    pub(crate) listener: T,
    pub(crate) manager: ConnectionManager<P>,
}

impl<T, P> ListenerTask<T, P>
where
    T: Listener,
    P: PubSub + Clone + 'static,
{
    /// Task future, which will be run by [`Self::spawn`].
    ///
    /// This future is a simple loop that accepts new connections, and uses
    /// the [`ConnectionManager`] to handle them.
    pub(crate) async fn task_future(self) {
        let ListenerTask {
            listener,
            mut manager,
        } = self;

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(err) => {
                    error!(%err, "Failed to accept connection");
                    continue;
                }
            };

            manager.handle_new_connection(stream, peer);
        }
    }

    /// Spawn the future produced by [`Self::task_future`].
    pub(crate) fn spawn(self) -> JoinHandle<Option<()>> {
        let tasks = self.manager.root_tasks.clone();
        let future = self.task_future();
        tasks.spawn(future)
    }
}

/// The `ConnectionManager` provides connections with IDs, and handles spawning
/// the [`Session`] for each connection.
pub(crate) struct ConnectionManager<P> {
    pub(crate) root_tasks: TaskSet,

    pub(crate) next_id: ConnectionId,

    pub(crate) relay: P,

    pub(crate) config: Arc<SessionConfig>,
}

impl<P> ConnectionManager<P>
where
    P: PubSub + Clone + 'static,
{
    /// Increment the connection ID counter and return an unused ID.
    fn next_id(&mut self) -> ConnectionId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Spawn a new [`Session`] for a connection. The session is cancelled
    /// with the server.
    fn handle_new_connection<S>(&mut self, stream: S, peer: String)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
    {
        let conn_id = self.next_id();
        debug!(conn_id, %peer, "new connection");

        let session = Session {
            conn_id,
            relay: self.relay.clone(),
            config: self.config.clone(),
            stream,
            peer,
            token: self.root_tasks.token().child_token(),
        };
        self.root_tasks.spawn(session.run());
    }
}
