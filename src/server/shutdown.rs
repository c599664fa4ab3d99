use crate::TaskSet;
use tokio_util::{sync::WaitForCancellationFuture, task::task_tracker::TaskTrackerWaitFuture};

/// The shutdown signal for some server. When dropped, will cancel the
/// listener and every running session, disconnecting their clients from the
/// relay.
///
/// The shutdown wraps a [`TaskTracker`] and a [`CancellationToken`], and
/// exposes methods from those APIs. Please see the documentation for those
/// types for more information.
///
/// [`TaskTracker`]: tokio_util::task::TaskTracker
/// [`CancellationToken`]: tokio_util::sync::CancellationToken
#[derive(Debug)]
pub struct ServerShutdown {
    pub(crate) task_set: TaskSet,
}

impl From<TaskSet> for ServerShutdown {
    fn from(task_set: TaskSet) -> Self {
        Self::new(task_set)
    }
}

impl ServerShutdown {
    /// Create a new [`ServerShutdown`] with the given [`TaskSet`].
    pub(crate) const fn new(task_set: TaskSet) -> Self {
        Self { task_set }
    }

    /// Wait for the tasks spawned by the server to complete. This is a wrapper
    /// for [`TaskTracker::wait`], and allows outside code to wait for the
    /// listener and every session to finish.
    ///
    /// This future will not resolve until both of the following are true:
    /// - [`Self::close`] has been called.
    /// - All tasks spawned by the server have finished running.
    ///
    /// [`TaskTracker::wait`]: tokio_util::task::TaskTracker::wait
    pub fn wait(&self) -> TaskTrackerWaitFuture<'_> {
        self.task_set.wait()
    }

    /// Close the internal [`TaskTracker`], allowing [`Self::wait`] futures to
    /// resolve once all tasks are done. This does not stop the server.
    ///
    /// [`TaskTracker`]: tokio_util::task::TaskTracker
    pub fn close(&self) {
        self.task_set.close();
    }

    /// Check if the server's internal [`TaskTracker`] has been closed.
    ///
    /// [`TaskTracker`]: tokio_util::task::TaskTracker
    pub fn is_closed(&self) -> bool {
        self.task_set.is_closed()
    }

    /// Stop accepting connections and end every running session.
    pub fn cancel(&self) {
        self.task_set.cancel();
    }

    /// Check if the server has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.task_set.is_cancelled()
    }

    /// Get a future that resolves when the server has been cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.task_set.cancelled()
    }

    /// Shutdown the server, and wait for all tasks to complete.
    ///
    /// This is equivalent to calling [`Self::cancel`], [`Self::close`] and
    /// then awaiting [`Self::wait`].
    pub async fn shutdown(self) {
        self.task_set.cancel();
        self.close();
        self.wait().await;
    }
}

impl Drop for ServerShutdown {
    fn drop(&mut self) {
        self.task_set.cancel();
    }
}
