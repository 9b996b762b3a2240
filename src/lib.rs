//! tether: a bidirectional peer API server.
//!
//! This crate multiplexes three interaction modes over a single
//! long-lived, message-framed, full-duplex connection (typically a
//! WebSocket): fire-and-forget **events**, request/response **rpc**, and
//! server-push **subscriptions**. A process hosts one or more
//! [`Listener`]s; each listener exposes a handler dictionary — an
//! [`Api`] — to many connected peers simultaneously.
//!
//! ## Basic usage
//!
//! Build an [`Api`], hand it to a [`Listener`], and serve:
//!
//! ```no_run
//! use tether::{pubsub::Bind, Api, Listener, Publication};
//! use serde_json::{json, Value};
//!
//! # async fn _main() {
//! let api = Api::new()
//!     // Events fire and forget: no reply frame is ever produced.
//!     .event("ping", tether::Arity::variadic(), |args: Vec<Value>| async move {
//!         tracing::info!(?args, "pinged");
//!     })
//!     // RPCs answer with an `rpc-response` correlated by the request id.
//!     .rpc("add-two", 2, |args: Vec<Value>| async move {
//!         let (a, b) = (args[0].as_i64().unwrap_or(0), args[1].as_i64().unwrap_or(0));
//!         Ok::<_, &str>(a + b)
//!     })
//!     // Subscriptions stream values back until either side closes.
//!     .subscription("countdown", 1, |args: Vec<Value>| async move {
//!         let from = args[0].as_i64().ok_or("countdown wants a number")?;
//!         let (tx, rx) = tokio::sync::mpsc::channel(8);
//!         tokio::spawn(async move {
//!             for n in (0..=from).rev() {
//!                 if tx.send(json!(n)).await.is_err() {
//!                     break; // unsubscribed or disconnected
//!                 }
//!             }
//!         });
//!         Ok::<_, &str>(Publication::new(rx))
//!     });
//!
//! let listener = Listener::new(api);
//! let addr = std::net::SocketAddr::from(([0, 0, 0, 0], 4242));
//! let shutdown = addr.serve(listener).await.unwrap();
//! # drop(shutdown);
//! # }
//! ```
//!
//! ## The wire
//!
//! Every frame is one self-describing [`Message`]. A peer's first frame
//! declares its id (`{"peer-id": "..."}`) and is answered with
//! `{"type": "connect-reply", "success": true}`. After that:
//!
//! - `{"event": "rpc", "fn": "add-two", "args": [2, 3], "id": "r1"}`
//!   is answered with `{"event": "rpc-response", "id": "r1", "result": 5}`
//!   (or an `error` field instead of `result`);
//! - `{"event": "subscription", "fn": "countdown", "args": [3], "id": "s1"}`
//!   opens a stream of `{"event": "publication", "id": "s1", "value": …}`
//!   frames, closed by `{"event": "unsubscription", "id": "s1"}`;
//! - any other `event` tag fires the event handler of that name.
//!
//! ## Middleware
//!
//! Every inbound message runs through an interceptor chain; custom
//! [`Interceptor`] stages see the mutable [`Ctx`] on the way in and the
//! way out, and can short-circuit by recording a [`ChainError`].
//!
//! ## Concurrency
//!
//! Each peer gets one router task and one write task; every message
//! dispatch and every subscription pipeline is its own task. A handler
//! failure is rendered into an `rpc-response` error for the offending
//! request and never affects the peer's other traffic. Within one peer,
//! messages are dispatched in arrival order, but responses land in
//! completion order; publications of a single subscription always arrive
//! in the producer's emission order.

#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    unreachable_pub,
    clippy::missing_const_for_fn,
    rustdoc::all
)]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod api;
pub use api::{Api, ApiHandle, Arity, BoxError, Publication};

mod chain;
pub use chain::{ChainError, Interceptor};

mod ctx;
pub use ctx::{Ctx, PeerSink, SinkError};

mod error;
pub use error::{HandshakeError, ListenerError, RegistrationError};

#[cfg(feature = "axum")]
mod http;
#[cfg(feature = "axum")]
pub use http::rest_router;

mod listener;
pub use listener::{Listener, ListenerBuilder, DEFAULT_OUTBOUND_BUFFER};

mod peer;
pub use peer::{Origin, Peer, PeerId, PeerTable};

pub mod pubsub;

mod stages;
pub use stages::last_handler_error;

mod tasks;

mod types;
pub use types::{ConnectReply, DecodeError, Message, MessageKind, MsgId};

/// Re-export of the `serde_json` crate, primarily to provide the
/// `RawValue` type used for pre-encoded frames.
pub use serde_json::{self, value::RawValue};
