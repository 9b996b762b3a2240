//! The handler dictionary: three buckets of named handlers.
//!
//! An [`Api`] groups handlers into `event`, `rpc`, and `subscription`
//! buckets, each keyed by name. Handlers take positional JSON arguments
//! and declare at registration which argument counts they accept (an
//! [`Arity`]); name resolution at dispatch time is a single map access.
//!
//! A built [`Api`] is immutable. Live reloads go through an
//! [`ApiHandle`], which swaps the whole dictionary atomically: every
//! inbound message snapshots the dictionary exactly once before routing,
//! so no request ever sees a mix of old and new handlers.

use crate::error::RegistrationError;
use arc_swap::ArcSwap;
use core::fmt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::{collections::HashMap, future::Future, sync::Arc};
use tokio::sync::mpsc;

/// Type-erased handler error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub(crate) type EventFn = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, ()> + Send + Sync>;
pub(crate) type RpcFn =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>;
pub(crate) type SubscribeFn =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Publication, BoxError>> + Send + Sync>;

/// The argument counts a handler accepts.
///
/// Arity is declared at registration and checked before invocation;
/// resolution is by count only, never by argument type.
#[derive(Debug, Clone, Default)]
pub struct Arity {
    fixed: Vec<usize>,
    variadic: bool,
}

impl Arity {
    /// Accept exactly `n` arguments.
    pub fn exactly(n: usize) -> Self {
        Self {
            fixed: vec![n],
            variadic: false,
        }
    }

    /// Accept any number of arguments.
    pub const fn variadic() -> Self {
        Self {
            fixed: Vec::new(),
            variadic: true,
        }
    }

    /// Also accept exactly `n` arguments.
    #[must_use]
    pub fn or(mut self, n: usize) -> Self {
        self.fixed.push(n);
        self
    }

    /// Whether `n` arguments are acceptable.
    pub fn accepts(&self, n: usize) -> bool {
        self.variadic || self.fixed.contains(&n)
    }
}

impl From<usize> for Arity {
    fn from(n: usize) -> Self {
        Self::exactly(n)
    }
}

impl<const N: usize> From<[usize; N]> for Arity {
    fn from(counts: [usize; N]) -> Self {
        Self {
            fixed: counts.to_vec(),
            variadic: false,
        }
    }
}

/// A running subscription's producer side, as returned by a subscription
/// handler.
///
/// The channel is the stream of values to push to the peer; the optional
/// stop hook runs exactly once when the subscription is torn down (by
/// explicit unsubscription, peer disconnect, or producer exhaustion).
///
/// A bare receiver converts directly:
///
/// ```
/// # use tether::Publication;
/// let (tx, rx) = tokio::sync::mpsc::channel(8);
/// # let _ = tx;
/// let publication: Publication = rx.into();
/// ```
pub struct Publication {
    /// Values produced by the subscription.
    pub chan: mpsc::Receiver<Value>,
    /// Invoked exactly once on teardown.
    pub stop: Option<Box<dyn FnOnce() + Send>>,
}

impl Publication {
    /// Create a publication with no stop hook.
    pub const fn new(chan: mpsc::Receiver<Value>) -> Self {
        Self { chan, stop: None }
    }

    /// Create a publication with a stop hook.
    pub fn with_stop(chan: mpsc::Receiver<Value>, stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            chan,
            stop: Some(Box::new(stop)),
        }
    }
}

impl From<mpsc::Receiver<Value>> for Publication {
    fn from(chan: mpsc::Receiver<Value>) -> Self {
        Self::new(chan)
    }
}

impl fmt::Debug for Publication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publication")
            .field("has_stop", &self.stop.is_some())
            .finish_non_exhaustive()
    }
}

pub(crate) struct Entry<F> {
    pub(crate) arity: Arity,
    pub(crate) f: F,
}

/// The three-bucket handler dictionary.
///
/// Built with the consuming registration methods, then handed to a
/// [`Listener`](crate::Listener) (or an [`ApiHandle`] for live reloads).
///
/// ```
/// use tether::{Api, Publication};
/// use serde_json::{json, Value};
///
/// let api = Api::new()
///     .event("ping", tether::Arity::variadic(), |args: Vec<Value>| async move {
///         println!("pinged with {args:?}");
///     })
///     .rpc("add-two", 2, |args: Vec<Value>| async move {
///         let (a, b) = (args[0].as_i64().unwrap_or(0), args[1].as_i64().unwrap_or(0));
///         Ok::<_, &str>(a + b)
///     })
///     .subscription("ticks", 0, |_args| async move {
///         let (tx, rx) = tokio::sync::mpsc::channel(8);
///         tokio::spawn(async move {
///             for n in 0..3 {
///                 if tx.send(json!(n)).await.is_err() {
///                     break;
///                 }
///             }
///         });
///         Ok::<_, &str>(Publication::new(rx))
///     });
/// # let _ = api;
/// ```
#[derive(Default)]
pub struct Api {
    events: HashMap<String, Entry<EventFn>>,
    rpcs: HashMap<String, Entry<RpcFn>>,
    subscriptions: HashMap<String, Entry<SubscribeFn>>,
}

impl Api {
    /// Create an empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fire-and-forget event handler under `tag`.
    ///
    /// The handler's return value is ignored.
    ///
    /// ## Panics
    ///
    /// Panics if an event handler named `tag` is already registered.
    #[track_caller]
    pub fn event<A, F, Fut>(mut self, tag: impl Into<String>, arity: A, f: F) -> Self
    where
        A: Into<Arity>,
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let f: EventFn = Arc::new(move |args| Box::pin(f(args)));
        insert(&mut self.events, tag.into(), arity.into(), f);
        self
    }

    /// Register a request/response handler under `name`.
    ///
    /// The handler returns `Result<R, E>` for any serializable `R`; an
    /// `Err` becomes an `rpc-response` carrying the rendered error.
    ///
    /// ## Panics
    ///
    /// Panics if an rpc handler named `name` is already registered.
    #[track_caller]
    pub fn rpc<A, F, Fut, R, E>(mut self, name: impl Into<String>, arity: A, f: F) -> Self
    where
        A: Into<Arity>,
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: Serialize,
        E: Into<BoxError>,
    {
        let f: RpcFn = Arc::new(move |args| {
            let fut = f(args);
            Box::pin(async move {
                match fut.await {
                    Ok(r) => serde_json::to_value(r).map_err(Into::into),
                    Err(e) => Err(e.into()),
                }
            })
        });
        insert(&mut self.rpcs, name.into(), arity.into(), f);
        self
    }

    /// Register a subscription handler under `name`.
    ///
    /// The handler returns anything convertible to a [`Publication`]: a
    /// full publication with a stop hook, or a bare channel receiver.
    ///
    /// ## Panics
    ///
    /// Panics if a subscription handler named `name` is already
    /// registered.
    #[track_caller]
    pub fn subscription<A, F, Fut, P, E>(mut self, name: impl Into<String>, arity: A, f: F) -> Self
    where
        A: Into<Arity>,
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<P, E>> + Send + 'static,
        P: Into<Publication>,
        E: Into<BoxError>,
    {
        let f: SubscribeFn = Arc::new(move |args| {
            let fut = f(args);
            Box::pin(async move {
                match fut.await {
                    Ok(p) => Ok(p.into()),
                    Err(e) => Err(e.into()),
                }
            })
        });
        insert(&mut self.subscriptions, name.into(), arity.into(), f);
        self
    }

    pub(crate) fn event_entry(&self, tag: &str) -> Option<&Entry<EventFn>> {
        self.events.get(tag)
    }

    pub(crate) fn rpc_entry(&self, name: &str) -> Option<&Entry<RpcFn>> {
        self.rpcs.get(name)
    }

    pub(crate) fn subscription_entry(&self, name: &str) -> Option<&Entry<SubscribeFn>> {
        self.subscriptions.get(name)
    }
}

impl fmt::Debug for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Api")
            .field("events", &self.events.len())
            .field("rpcs", &self.rpcs.len())
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

#[track_caller]
fn insert<F>(map: &mut HashMap<String, Entry<F>>, name: String, arity: Arity, f: F) {
    if map.contains_key(&name) {
        panic!("{}", RegistrationError::handler_already_registered(name));
    }
    map.insert(name, Entry { arity, f });
}

/// A shared, atomically swappable [`Api`].
///
/// The listener resolves handlers against a snapshot taken once per
/// inbound message; [`ApiHandle::swap`] replaces the dictionary wholesale
/// for all future messages without tearing anything down.
#[derive(Clone)]
pub struct ApiHandle {
    inner: Arc<ArcSwap<Api>>,
}

impl ApiHandle {
    /// Wrap an [`Api`] in a shared handle.
    pub fn new(api: Api) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(api)),
        }
    }

    /// Snapshot the current dictionary.
    pub fn snapshot(&self) -> Arc<Api> {
        self.inner.load_full()
    }

    /// Replace the dictionary, returning the previous one.
    ///
    /// Messages already routed keep their snapshot; everything dispatched
    /// afterwards resolves against the new dictionary.
    pub fn swap(&self, api: Api) -> Arc<Api> {
        self.inner.swap(Arc::new(api))
    }
}

impl Default for ApiHandle {
    fn default() -> Self {
        Self::new(Api::new())
    }
}

impl From<Api> for ApiHandle {
    fn from(api: Api) -> Self {
        Self::new(api)
    }
}

impl fmt::Debug for ApiHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self.inner.load(), f)
    }
}
