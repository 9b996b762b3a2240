use crate::{peer::Origin, pubsub::ServerShutdown, Listener};
use bytes::Bytes;
use serde_json::value::RawValue;
use std::future::Future;
use tokio_stream::Stream;

/// Configuration objects that produce a [`Transport`].
///
/// A `Bind` implementor captures connection-related setup (addresses,
/// TLS, socket options) and outputs only the ready transport, so that
/// none of that leaks into the listener. The blanket [`Bind::serve`]
/// method is the one-call way to run a listener.
pub trait Bind: Send + Sync + Sized {
    /// The transport produced by this configuration.
    type Transport: Transport;

    /// The error type for producing the transport.
    type Error: core::error::Error + 'static;

    /// Create the transport.
    fn bind(self) -> impl Future<Output = Result<Self::Transport, Self::Error>> + Send;

    /// Bind and serve `listener`, returning a shutdown guard.
    ///
    /// The guard cancels the accept loop and every peer when dropped.
    fn serve(
        self,
        listener: Listener,
    ) -> impl Future<Output = Result<ServerShutdown, Self::Error>> + Send {
        async move {
            let transport = self.bind().await?;
            Ok(listener.serve_transport(transport))
        }
    }
}

/// A source of inbound peer connections.
///
/// Each accepted connection is split into a [`FrameSink`] and a
/// [`FrameStream`], typically by splitting a combined stream/sink object.
/// Stream adapters may wrap the underlying transport halves; the
/// listener only ever sees frames.
pub trait Transport: Send + 'static {
    /// The outbound half produced for each connection.
    type Sink: FrameSink;
    /// The inbound half produced for each connection.
    type Stream: FrameStream;
    /// The error type for accepting a connection.
    type Error: core::error::Error + Send + Sync + 'static;

    /// Accept an inbound connection and split it.
    fn accept(
        &self,
    ) -> impl Future<Output = Result<(Self::Sink, Self::Stream, Origin), Self::Error>> + Send;
}

/// The outbound half of one peer's connection: accepts encoded frames.
pub trait FrameSink: Send + 'static {
    /// Error type for the sink.
    type Error: core::error::Error + Send + Sync + 'static;

    /// Write one encoded frame to the connection.
    fn send_json(
        &mut self,
        json: Box<RawValue>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Frames can be captured on a plain channel; tests and in-process
/// transports use this.
impl FrameSink for tokio::sync::mpsc::Sender<Box<RawValue>> {
    type Error = tokio::sync::mpsc::error::SendError<Box<RawValue>>;

    fn send_json(
        &mut self,
        json: Box<RawValue>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        self.send(json)
    }
}

/// The inbound half of one peer's connection: a stream of raw frames.
pub trait FrameStream: Stream<Item = Bytes> + Send + Unpin + 'static {}

impl<T> FrameStream for T where T: Stream<Item = Bytes> + Send + Unpin + 'static {}
