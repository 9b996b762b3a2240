use crate::{
    chain,
    ctx::{Ctx, PeerSink},
    error::ListenerError,
    listener::ListenerShared,
    peer::Peer,
    pubsub::{FrameSink, FrameStream},
    tasks::TaskSet,
};
use core::fmt;
use serde_json::value::RawValue;
use std::sync::Arc;
use tokio::{pin, select, sync::mpsc, task::JoinHandle};
use tokio_stream::StreamExt;
use tokio_util::sync::WaitForCancellationFutureOwned;
use tracing::{debug, debug_span, trace, Instrument};

/// An encoded frame queued on a peer's outbound buffer.
#[derive(Debug)]
pub(crate) struct WriteItem {
    pub(crate) span: tracing::Span,
    pub(crate) json: Box<RawValue>,
}

/// The per-peer router loop: reads inbound frames and dispatches each
/// through the interceptor chain until the stream ends.
pub(crate) struct RouteTask<S> {
    /// Shared listener state: api handle, chain, peer table, callbacks.
    pub(crate) shared: Arc<ListenerShared>,
    /// The peer serviced by this task.
    pub(crate) peer: Arc<Peer>,
    /// Stream of inbound frames.
    pub(crate) frames: S,
    /// Sender to the write task.
    pub(crate) write_tx: mpsc::Sender<WriteItem>,
    /// The task set for this connection.
    pub(crate) tasks: TaskSet,
}

impl<S> fmt::Debug for RouteTask<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTask")
            .field("peer_id", &self.peer.peer_id())
            .finish_non_exhaustive()
    }
}

impl<S> RouteTask<S>
where
    S: FrameStream,
{
    /// Task future, run by [`Self::spawn`].
    ///
    /// Reads frames until the inbound stream ends, the write task goes
    /// away, or the peer is cancelled. Each frame becomes a fresh
    /// [`Ctx`] dispatched through the chain in its own task, so a slow
    /// handler never stalls the loop; chain errors are captured by the
    /// responder stage and never reach this loop. On exit the task runs
    /// the disconnect sequence for its peer.
    pub(crate) async fn task_future(self, cancel: WaitForCancellationFutureOwned) {
        let Self {
            shared,
            peer,
            mut frames,
            write_tx,
            tasks,
        } = self;

        // In-flight chain runs; awaited before the disconnect sequence.
        let children = tasks.child();

        pin!(cancel);

        loop {
            select! {
                biased;
                _ = &mut cancel => {
                    debug!("route task cancelled");
                    break;
                }
                _ = write_tx.closed() => {
                    debug!("write task has gone away");
                    break;
                }
                frame = frames.next() => {
                    let Some(frame) = frame else {
                        trace!("inbound stream has closed");
                        break;
                    };

                    let request = match shared.codec.decode(&frame) {
                        Ok(msg) => msg,
                        Err(err) => {
                            shared.report(&ListenerError::Decode(err));
                            continue;
                        }
                    };

                    // Acquiring the permit before spawning means the
                    // write buffer backpressures this loop: when the
                    // peer stops reading responses, we stop reading its
                    // requests.
                    let Ok(permit) = write_tx.clone().reserve_owned().await else {
                        debug!("write task dropped while waiting for permit");
                        break;
                    };

                    let span = debug_span!(
                        "tether.dispatch",
                        peer_id = %peer.peer_id(),
                        tag = request.event.as_deref().unwrap_or(""),
                    );

                    let mut cx = Ctx {
                        api: shared.api.snapshot(),
                        peers: shared.peers.clone(),
                        peer_id: peer.peer_id().to_owned(),
                        sink: PeerSink::new(write_tx.clone(), shared.codec.clone())
                            .with_permit(permit),
                        request,
                        response: None,
                        error: None,
                    };

                    let stages = shared.chain.clone();
                    children.spawn_cancellable(
                        async move {
                            chain::run(&stages, &mut cx).await;
                        }
                        .instrument(span),
                    );
                }
            }
        }

        children.shutdown().await;
        shared.router_exit(&peer);
    }

    /// Spawn the future produced by [`Self::task_future`].
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        let tasks = self.tasks.clone();
        tasks.spawn_graceful(move |cancel| self.task_future(cancel))
    }
}

/// The per-peer write task: drains the outbound buffer into the frame
/// sink.
pub(crate) struct WriteTask<S> {
    /// The task set for this connection.
    pub(crate) tasks: TaskSet,
    /// Id of the peer serviced by this task.
    pub(crate) peer_id: String,
    /// Frames to be written to the connection.
    ///
    /// Dropping this receiver shuts down the associated [`RouteTask`].
    pub(crate) items: mpsc::Receiver<WriteItem>,
    /// The outbound connection.
    pub(crate) sink: S,
}

impl<S> fmt::Debug for WriteTask<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteTask")
            .field("peer_id", &self.peer_id)
            .finish_non_exhaustive()
    }
}

impl<S> WriteTask<S>
where
    S: FrameSink,
{
    /// Task future, run by [`Self::spawn`]. A simple drain loop; a sink
    /// write failure is a transport error and ends the connection.
    pub(crate) async fn task_future(self) {
        let Self {
            tasks,
            peer_id,
            mut items,
            mut sink,
        } = self;

        loop {
            select! {
                biased;
                _ = tasks.cancelled() => {
                    debug!("shutdown signal received");
                    break;
                }
                item = items.recv() => {
                    let Some(WriteItem { span, json }) = item else {
                        trace!("outbound buffer has closed");
                        break;
                    };

                    if let Err(err) = sink.send_json(json).instrument(span).await {
                        debug!(%err, %peer_id, "failed to write frame");
                        break;
                    }
                }
            }
        }
    }

    /// Spawn the future produced by [`Self::task_future`].
    pub(crate) fn spawn(self) -> JoinHandle<Option<()>> {
        let tasks = self.tasks.clone();
        tasks.spawn_cancellable(self.task_future())
    }
}
