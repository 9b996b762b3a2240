use crate::tasks::TaskSet;
use tokio_util::{sync::WaitForCancellationFuture, task::task_tracker::TaskTrackerWaitFuture};

/// The shutdown guard for a served listener. When dropped, cancels the
/// accept loop, every peer's router and write tasks, and every
/// subscription pipeline.
///
/// The guard wraps a [`TaskTracker`] and a [`CancellationToken`] and
/// exposes their lifecycle methods.
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
    pub(crate) const fn new(task_set: TaskSet) -> Self {
        Self { task_set }
    }

    /// Issue a cancellation signal to every task spawned by the server.
    pub fn cancel(&self) {
        self.task_set.cancel();
    }

    /// Whether the server has been told to shut down.
    pub fn is_cancelled(&self) -> bool {
        self.task_set.is_cancelled()
    }

    /// A future that resolves once the cancellation signal has been
    /// issued.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.task_set.cancelled()
    }

    /// Close the internal task tracker so that [`Self::wait`] can
    /// resolve. Does not cancel running tasks or prevent new spawns.
    pub fn close(&self) {
        self.task_set.close();
    }

    /// Whether the internal task tracker has been closed.
    pub fn is_closed(&self) -> bool {
        self.task_set.is_closed()
    }

    /// Wait for the server's tasks to complete. Resolves only after
    /// [`Self::close`] has been called and all tasks have finished.
    pub fn wait(&self) -> TaskTrackerWaitFuture<'_> {
        self.task_set.wait()
    }

    /// Cancel, close, and wait: a full orderly shutdown.
    pub async fn shutdown(self) {
        self.task_set.shutdown().await;
    }
}

impl Drop for ServerShutdown {
    fn drop(&mut self) {
        self.task_set.cancel();
    }
}
