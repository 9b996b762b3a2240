use crate::{
    api::ApiHandle,
    chain::Interceptor,
    ctx::PeerSink,
    error::{HandshakeError, ListenerError},
    peer::{Origin, Peer, PeerTable},
    pubsub::{
        shared::{RouteTask, WriteItem, WriteTask},
        Codec, FrameSink, FrameStream, JsonCodec, ServerShutdown, Transport,
    },
    stages::{ApiRouter, Responder},
    tasks::TaskSet,
    types::ConnectReply,
};
use core::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, error, Span};

/// Default outbound frame buffer size per peer.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 16;

type PeerCallback = Arc<dyn Fn(Arc<Peer>) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&ListenerError) + Send + Sync>;

pub(crate) struct ListenerShared {
    pub(crate) api: ApiHandle,
    pub(crate) peers: PeerTable,
    pub(crate) chain: Arc<[Arc<dyn Interceptor>]>,
    pub(crate) codec: Arc<dyn Codec>,
    pub(crate) on_connect: Option<PeerCallback>,
    pub(crate) on_disconnect: Option<PeerCallback>,
    pub(crate) on_error: ErrorCallback,
    pub(crate) outbound_buffer: usize,
    pub(crate) tasks: TaskSet,
}

impl ListenerShared {
    pub(crate) fn report(&self, err: &ListenerError) {
        (self.on_error)(err);
    }

    /// The disconnect sequence run by a router loop on exit: user
    /// callback first, then removal and teardown.
    pub(crate) fn router_exit(&self, peer: &Arc<Peer>) {
        if let Some(cb) = &self.on_disconnect {
            cb(Arc::clone(peer));
        }
        // A displaced record must not evict its replacement.
        self.peers.remove_if_same(peer.peer_id(), peer);
        peer.teardown();
    }
}

/// The server-side object that accepts peers and exposes a handler
/// dictionary.
///
/// A listener owns the peer table and everything running on behalf of
/// its peers. Cloning is cheap and clones observe the same server.
///
/// ```no_run
/// use tether::{pubsub::Bind, Api, Listener};
/// use serde_json::Value;
///
/// # async fn _main() {
/// let api = Api::new().rpc("add-two", 2, |args: Vec<Value>| async move {
///     let (a, b) = (args[0].as_i64().unwrap_or(0), args[1].as_i64().unwrap_or(0));
///     Ok::<_, &str>(a + b)
/// });
///
/// let listener = Listener::builder()
///     .api(api)
///     .on_connect(|peer| println!("{} connected", peer.peer_id()))
///     .build();
///
/// let addr = std::net::SocketAddr::from(([0, 0, 0, 0], 4242));
/// let _shutdown = addr.serve(listener).await.unwrap();
/// # }
/// ```
#[derive(Clone)]
pub struct Listener {
    inner: Arc<ListenerShared>,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("api", &self.inner.api)
            .field("peers", &self.inner.peers.len())
            .finish_non_exhaustive()
    }
}

impl Listener {
    /// Create a listener over `api` with default options.
    pub fn new(api: impl Into<ApiHandle>) -> Self {
        Self::builder().api(api).build()
    }

    /// Start building a listener.
    pub fn builder() -> ListenerBuilder {
        ListenerBuilder::default()
    }

    /// The shared handler dictionary. Swapping it takes effect for every
    /// message dispatched afterwards, across all peers.
    pub fn api(&self) -> &ApiHandle {
        &self.inner.api
    }

    /// The table of connected peers.
    pub fn peers(&self) -> &PeerTable {
        &self.inner.peers
    }

    /// Handle one new connection: perform the handshake and start the
    /// peer's router.
    ///
    /// Reads exactly one frame (which must carry `peer-id`), installs
    /// the peer record — displacing, without disconnecting, any record
    /// with the same id — starts the router and write tasks, queues the
    /// connect acknowledgement, and invokes `on_connect`.
    ///
    /// Errors are reported to `on_error` and returned to the caller.
    pub async fn attach<Si, St>(
        &self,
        sink: Si,
        stream: St,
        origin: Origin,
    ) -> Result<Arc<Peer>, HandshakeError>
    where
        Si: FrameSink,
        St: FrameStream,
    {
        match self.handshake(sink, stream, origin).await {
            Ok(peer) => Ok(peer),
            Err(err) => {
                let wrapped = ListenerError::Handshake(err);
                self.inner.report(&wrapped);
                let ListenerError::Handshake(err) = wrapped else {
                    unreachable!()
                };
                Err(err)
            }
        }
    }

    async fn handshake<Si, St>(
        &self,
        sink: Si,
        mut frames: St,
        origin: Origin,
    ) -> Result<Arc<Peer>, HandshakeError>
    where
        Si: FrameSink,
        St: FrameStream,
    {
        let inner = &self.inner;

        let first = frames.next().await.ok_or(HandshakeError::Closed)?;
        let hello = inner.codec.decode(&first)?;
        let peer_id = hello.peer_id.ok_or(HandshakeError::MissingPeerId)?;

        let (write_tx, write_rx) = mpsc::channel(inner.outbound_buffer);
        let tasks = inner.tasks.child();
        let peer = Arc::new(Peer::new(
            peer_id.clone(),
            PeerSink::new(write_tx.clone(), inner.codec.clone()),
            origin,
            tasks.clone(),
        ));

        if let Some(displaced) = inner.peers.insert(Arc::clone(&peer)) {
            debug!(peer_id = %displaced.peer_id(), "peer id reused; displacing previous record");
        }

        RouteTask {
            shared: Arc::clone(inner),
            peer: Arc::clone(&peer),
            frames,
            write_tx: write_tx.clone(),
            tasks: tasks.clone(),
        }
        .spawn();

        WriteTask {
            tasks,
            peer_id: peer_id.clone(),
            items: write_rx,
            sink,
        }
        .spawn();

        let ack = inner
            .codec
            .encode_reply(&ConnectReply::OK)
            .map_err(HandshakeError::Encode)?;
        let item = WriteItem {
            span: Span::current(),
            json: ack,
        };
        if write_tx.send(item).await.is_err() {
            return Err(HandshakeError::Closed);
        }

        if let Some(cb) = &inner.on_connect {
            cb(Arc::clone(&peer));
        }

        Ok(peer)
    }

    /// Disconnect a peer: remove its record and tear down its router,
    /// write task, and subscriptions. Returns whether a record existed.
    pub fn disconnect(&self, peer_id: &str) -> bool {
        match self.inner.peers.remove(peer_id) {
            Some(peer) => {
                peer.teardown();
                true
            }
            None => false,
        }
    }

    /// Disconnect every connected peer.
    pub fn disconnect_all(&self) {
        for id in self.inner.peers.ids() {
            self.disconnect(&id);
        }
    }

    /// Disconnect every peer, stop all accept loops, and wait for the
    /// listener's tasks to finish.
    pub async fn close(&self) {
        self.disconnect_all();
        self.inner.tasks.shutdown().await;
    }

    /// Run an accept loop over `transport`, attaching every connection
    /// it yields. Returns a guard that stops the server when dropped.
    ///
    /// ## Panics
    ///
    /// Panics outside the context of a tokio runtime.
    pub fn serve_transport<T>(&self, transport: T) -> ServerShutdown
    where
        T: Transport,
    {
        let this = self.clone();
        self.inner
            .tasks
            .spawn_cancellable(this.accept_loop(transport));
        ServerShutdown::new(self.inner.tasks.clone())
    }

    async fn accept_loop<T>(self, transport: T)
    where
        T: Transport,
    {
        loop {
            match transport.accept().await {
                Ok((sink, stream, origin)) => {
                    let this = self.clone();
                    // The handshake reads a frame; it must not stall
                    // accepting other connections.
                    self.inner.tasks.spawn_cancellable(async move {
                        // Failures were already reported to on_error.
                        let _ = this.attach(sink, stream, origin).await;
                    });
                }
                Err(err) => {
                    self.inner.report(&ListenerError::Accept(Box::new(err)));
                    continue;
                }
            }
        }
    }
}

/// Configuration for a [`Listener`].
pub struct ListenerBuilder {
    api: ApiHandle,
    middleware: Vec<Arc<dyn Interceptor>>,
    responder: Option<Arc<dyn Interceptor>>,
    codec: Arc<dyn Codec>,
    on_connect: Option<PeerCallback>,
    on_disconnect: Option<PeerCallback>,
    on_error: Option<ErrorCallback>,
    outbound_buffer: usize,
}

impl Default for ListenerBuilder {
    fn default() -> Self {
        Self {
            api: ApiHandle::default(),
            middleware: Vec::new(),
            responder: None,
            codec: Arc::new(JsonCodec),
            on_connect: None,
            on_disconnect: None,
            on_error: None,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

impl fmt::Debug for ListenerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerBuilder")
            .field("api", &self.api)
            .field("middleware", &self.middleware.len())
            .field("outbound_buffer", &self.outbound_buffer)
            .finish_non_exhaustive()
    }
}

impl ListenerBuilder {
    /// The handler dictionary. Accepts a plain [`Api`](crate::Api) or a
    /// shared [`ApiHandle`] for live reloads.
    pub fn api(mut self, api: impl Into<ApiHandle>) -> Self {
        self.api = api.into();
        self
    }

    /// Append a middleware stage. Middleware sits between the responder
    /// (outermost) and the api router (innermost), in registration
    /// order.
    pub fn middleware(mut self, stage: impl Interceptor) -> Self {
        self.middleware.push(Arc::new(stage));
        self
    }

    /// Replace the built-in responder stage.
    pub fn responder(mut self, stage: impl Interceptor) -> Self {
        self.responder = Some(Arc::new(stage));
        self
    }

    /// The wire encoding for both directions. Defaults to
    /// [`JsonCodec`].
    pub fn codec(mut self, codec: impl Codec) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Callback invoked after each successful handshake.
    pub fn on_connect(mut self, f: impl Fn(Arc<Peer>) + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Callback invoked when a peer's router exits, before teardown.
    pub fn on_disconnect(mut self, f: impl Fn(Arc<Peer>) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Callback for transport and handshake errors. The default logs at
    /// error level.
    pub fn on_error(mut self, f: impl Fn(&ListenerError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Outbound frame buffer depth per peer. This buffer holds both RPC
    /// responses and publications; a peer that stops reading fills it
    /// and is then no longer read from. Defaults to
    /// [`DEFAULT_OUTBOUND_BUFFER`].
    pub fn outbound_buffer(mut self, frames: usize) -> Self {
        self.outbound_buffer = frames;
        self
    }

    /// Build the listener.
    pub fn build(self) -> Listener {
        let mut chain: Vec<Arc<dyn Interceptor>> = Vec::with_capacity(self.middleware.len() + 2);
        chain.push(self.responder.unwrap_or_else(|| Arc::new(Responder)));
        chain.extend(self.middleware);
        chain.push(Arc::new(ApiRouter));

        Listener {
            inner: Arc::new(ListenerShared {
                api: self.api,
                peers: PeerTable::default(),
                chain: chain.into(),
                codec: self.codec,
                on_connect: self.on_connect,
                on_disconnect: self.on_disconnect,
                on_error: self
                    .on_error
                    .unwrap_or_else(|| Arc::new(|err| error!(%err, "listener error"))),
                outbound_buffer: self.outbound_buffer,
                tasks: TaskSet::default(),
            }),
        }
    }
}
