use std::future::Future;

use tokio::{runtime::Handle, task::JoinHandle};
use tokio_util::{
    sync::{CancellationToken, WaitForCancellationFuture},
    task::{task_tracker::TaskTrackerWaitFuture, TaskTracker},
};

/// This is a wrapper around a [`TaskTracker`] and a [`CancellationToken`]. It
/// owns the long-lived tasks of a [`Broker`] (channel dispatch loops) or of a
/// server (listener and session tasks), and tells them to shut down when the
/// set is cancelled.
///
/// When a [`Handle`] is provided, tasks are spawned on that handle. Otherwise,
/// they are spawned on the current runtime.
///
/// [`Broker`]: crate::Broker
#[derive(Debug, Clone, Default)]
pub(crate) struct TaskSet {
    tasks: TaskTracker,
    token: CancellationToken,
    handle: Option<Handle>,
}

impl From<Handle> for TaskSet {
    fn from(handle: Handle) -> Self {
        Self::with_handle(handle)
    }
}

impl TaskSet {
    /// Create a new [`TaskSet`] with a handle.
    pub(crate) fn with_handle(handle: Handle) -> Self {
        Self {
            tasks: TaskTracker::new(),
            token: CancellationToken::new(),
            handle: Some(handle),
        }
    }

    /// Get a handle to the runtime that the task set is running on.
    ///
    /// ## Panics
    ///
    /// This will panic if called outside the context of a Tokio runtime.
    pub(crate) fn handle(&self) -> Handle {
        self.handle
            .clone()
            .unwrap_or_else(tokio::runtime::Handle::current)
    }

    /// Get a reference to the cancellation token of this set.
    pub(crate) const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel the token, causing all tasks to be cancelled.
    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    /// Check if the token has been cancelled.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Get a future that resolves when the token is fired.
    pub(crate) fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Close the tracker, so that [`Self::wait`] resolves once the running
    /// tasks are done.
    pub(crate) fn close(&self) {
        self.tasks.close();
    }

    /// Check if the tracker has been closed.
    pub(crate) fn is_closed(&self) -> bool {
        self.tasks.is_closed()
    }

    /// Wait for the tracked tasks to finish. Only resolves after
    /// [`Self::close`].
    pub(crate) fn wait(&self) -> TaskTrackerWaitFuture<'_> {
        self.tasks.wait()
    }

    /// Prepare a future to be added to the task set, by wrapping it with a
    /// cancellation token.
    fn prep_fut<F>(&self, task: F) -> impl Future<Output = Option<F::Output>> + Send + 'static
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let token = self.token.clone();
        async move {
            tokio::select! {
                _ = token.cancelled() => None,
                result = task => Some(result),
            }
        }
    }

    /// Spawn a future on the provided handle, and add it to the task set.
    ///
    /// ## Panics
    ///
    /// This will panic if called outside the context of a Tokio runtime when
    /// `self.handle` is `None`.
    pub(crate) fn spawn<F>(&self, task: F) -> JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tasks.spawn_on(self.prep_fut(task), &self.handle())
    }
}
