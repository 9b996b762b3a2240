//! Transport plumbing for [`Listener`]s.
//!
//! This module is the seam between the per-peer message router and the
//! outside world. Built-in support is provided for WebSockets, and a
//! trait system is provided for custom connection types.
//!
//! ## Overview
//!
//! A [`Bind`] implementor captures connection-related configuration and
//! produces a [`Transport`]. The transport accepts inbound connections
//! and splits each into a [`FrameSink`] (outbound) and a [`FrameStream`]
//! (inbound), plus an [`Origin`] describing where it came from. The
//! [`Listener`](crate::Listener) performs the handshake on each accepted
//! connection and runs its router.
//!
//! Typical usage is one call:
//!
//! ```no_run
//! # use tether::{pubsub::Bind, Listener};
//! # async fn _main(listener: Listener) {
//! let addr = std::net::SocketAddr::from(([0, 0, 0, 0], 4242));
//! // The shutdown guard stops the server when dropped.
//! let shutdown = addr.serve(listener).await.unwrap();
//! # }
//! ```
//!
//! ## Backpressure and buffer saturation
//!
//! Each peer has a bounded outbound buffer drained by a write task. The
//! buffer holds RPC responses and subscription publications alike. When
//! a peer stops reading from its connection the buffer fills; the router
//! then stops reading requests from that peer (it reserves a buffer slot
//! before dispatching each message), and subscription pipelines stall on
//! their next send. Producers behind a stalled pipeline stall in turn
//! once the producer channel fills. No other flow control exists.
//!
//! The buffer size is set per listener with
//! [`ListenerBuilder::outbound_buffer`], and defaults to
//! [`DEFAULT_OUTBOUND_BUFFER`]. Frames are owned JSON values, so size
//! the buffer against the responses your handlers produce.
//!
//! ## Internal structure
//!
//! There are three task shapes:
//! - an accept task per served transport, spawned by
//!   [`Listener::serve_transport`];
//! - a `RouteTask` per connection, reading and dispatching frames;
//! - a `WriteTask` per connection, draining the outbound buffer into the
//!   sink.
//!
//! Subscription pipelines are additional per-subscription tasks owned by
//! the peer. All of them stop when the [`ServerShutdown`] guard drops.
//!
//! [`Listener::serve_transport`]: crate::Listener::serve_transport
//! [`ListenerBuilder::outbound_buffer`]: crate::ListenerBuilder::outbound_buffer
//! [`DEFAULT_OUTBOUND_BUFFER`]: crate::DEFAULT_OUTBOUND_BUFFER
//! [`Origin`]: crate::Origin

mod codec;
pub use codec::{Codec, JsonCodec};

pub(crate) mod shared;

mod shutdown;
pub use shutdown::ServerShutdown;

mod r#trait;
pub use r#trait::{Bind, FrameSink, FrameStream, Transport};

#[cfg(feature = "ws")]
mod ws;
#[cfg(feature = "ws")]
pub use ws::WsFrameStream;
