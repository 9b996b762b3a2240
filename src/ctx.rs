use crate::{
    chain::ChainError,
    peer::{PeerId, PeerTable},
    pubsub::{shared::WriteItem, Codec},
    types::Message,
    Api,
};
use core::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::Span;

/// The request envelope threaded through the interceptor chain.
///
/// One `Ctx` is built per inbound frame and dropped when the chain
/// finishes. The api field is a snapshot: it is loaded once before
/// routing and never observes a dictionary swap mid-request.
#[derive(Debug)]
pub struct Ctx {
    /// Snapshot of the handler dictionary this request resolves against.
    pub api: Arc<Api>,
    /// The listener's live peer table.
    pub peers: PeerTable,
    /// The id of the peer that sent the request.
    pub peer_id: PeerId,
    /// The outbound side of the peer's connection.
    pub sink: PeerSink,
    /// The inbound message.
    pub request: Message,
    /// The response produced so far, if any. Written by the rpc stage,
    /// consumed by the responder's leave phase.
    pub response: Option<Message>,
    /// The pending chain error, if any. See [`ChainError`].
    pub error: Option<ChainError>,
}

/// Errors from writing to a [`PeerSink`].
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The peer's outbound channel is gone (disconnected or torn down).
    #[error("peer sink closed")]
    Closed,
    /// The message could not be encoded.
    #[error("failed to encode outbound frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A capability to write frames to one peer's connection.
///
/// The sink is a bounded buffer drained by the peer's write task; `send`
/// stalls when the buffer is full, which is the crate's only flow
/// control. Cloning yields an equivalent capability (subscription
/// pipelines hold one each). The sink built for a router dispatch carries
/// one pre-reserved buffer slot, so the first write of a chain run cannot
/// stall even when other producers have filled the buffer.
pub struct PeerSink {
    tx: mpsc::Sender<WriteItem>,
    codec: Arc<dyn Codec>,
    permit: Option<mpsc::OwnedPermit<WriteItem>>,
}

impl PeerSink {
    pub(crate) fn new(tx: mpsc::Sender<WriteItem>, codec: Arc<dyn Codec>) -> Self {
        Self {
            tx,
            codec,
            permit: None,
        }
    }

    pub(crate) fn with_permit(mut self, permit: mpsc::OwnedPermit<WriteItem>) -> Self {
        self.permit = Some(permit);
        self
    }

    /// Whether the peer's write task has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Encode `msg` and queue it for the peer.
    ///
    /// Stalls when the outbound buffer is full. Failing because the peer
    /// disconnected is normal during teardown; callers that cannot do
    /// anything useful about it should drop the error.
    pub async fn send(&mut self, msg: &Message) -> Result<(), SinkError> {
        let json = self.codec.encode(msg)?;
        let item = WriteItem {
            span: Span::current(),
            json,
        };

        match self.permit.take() {
            Some(permit) => {
                let _ = permit.send(item);
                Ok(())
            }
            None => self.tx.send(item).await.map_err(|_| SinkError::Closed),
        }
    }
}

impl Clone for PeerSink {
    fn clone(&self) -> Self {
        // The reserved slot belongs to the original.
        Self {
            tx: self.tx.clone(),
            codec: self.codec.clone(),
            permit: None,
        }
    }
}

impl fmt::Debug for PeerSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSink")
            .field("closed", &self.tx.is_closed())
            .field("reserved", &self.permit.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) fn test_ctx() -> (Ctx, mpsc::Receiver<WriteItem>) {
    let (tx, rx) = mpsc::channel(8);
    let cx = Ctx {
        api: Arc::new(Api::new()),
        peers: PeerTable::default(),
        peer_id: "test-peer".to_owned(),
        sink: PeerSink::new(tx, Arc::new(crate::pubsub::JsonCodec)),
        request: Message::default(),
        response: None,
        error: None,
    };
    (cx, rx)
}
