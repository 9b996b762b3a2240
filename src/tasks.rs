use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::{
    sync::{CancellationToken, WaitForCancellationFuture, WaitForCancellationFutureOwned},
    task::{task_tracker::TaskTrackerWaitFuture, TaskTracker},
};

/// A [`TaskTracker`] paired with a [`CancellationToken`]: a group of
/// tasks that can be cancelled and awaited as one.
///
/// Cancellation flows downward: a child set is cancelled when its parent
/// is, but can also be cancelled on its own. The listener holds the root
/// set; each peer holds a child; each subscription pipeline holds a
/// grandchild.
#[derive(Debug, Clone, Default)]
pub(crate) struct TaskSet {
    tasks: TaskTracker,
    token: CancellationToken,
}

impl TaskSet {
    /// Cancel the token, asking every task in the set to stop.
    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the set has been cancelled.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// A future that resolves when the set is cancelled.
    pub(crate) fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Close the tracker, allowing [`Self::wait`] to resolve once the
    /// running tasks finish.
    pub(crate) fn close(&self) {
        self.tasks.close();
    }

    /// Whether the tracker has been closed.
    pub(crate) fn is_closed(&self) -> bool {
        self.tasks.is_closed()
    }

    /// Wait for the set to be closed and empty.
    pub(crate) fn wait(&self) -> TaskTrackerWaitFuture<'_> {
        self.tasks.wait()
    }

    /// Cancel everything and wait for it to finish.
    pub(crate) async fn shutdown(&self) {
        self.cancel();
        self.close();
        self.wait().await;
    }

    /// A child set: cancelled when this set is cancelled, waitable on its
    /// own.
    pub(crate) fn child(&self) -> Self {
        Self {
            tasks: TaskTracker::new(),
            token: self.token.child_token(),
        }
    }

    /// Spawn a future that is dropped as soon as the set is cancelled.
    ///
    /// ## Panics
    ///
    /// Panics outside the context of a tokio runtime.
    pub(crate) fn spawn_cancellable<F>(&self, task: F) -> JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let token = self.token.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => None,
                result = task => Some(result),
            }
        })
    }

    /// Spawn a future that receives the cancellation signal as an
    /// argument and is responsible for winding itself down.
    ///
    /// ## Panics
    ///
    /// Panics outside the context of a tokio runtime.
    pub(crate) fn spawn_graceful<F, Fut>(&self, task: F) -> JoinHandle<Fut::Output>
    where
        F: FnOnce(WaitForCancellationFutureOwned) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let cancel = self.token.clone().cancelled_owned();
        self.tasks.spawn(task(cancel))
    }
}
