//! The interceptor chain: an ordered pipeline threaded with a [`Ctx`].
//!
//! Each stage exposes three optional callbacks. `enter` runs front to
//! back; `leave` runs back to front once every stage has entered. When a
//! stage records a [`ChainError`] on the context, entering stops and the
//! unwind calls `on_error` instead of `leave` on each already-entered
//! stage, until one of them consumes the error (the built-in responder
//! turns it into an `rpc-response`).
//!
//! The effective chain for every inbound message is
//! `[responder, middleware…, api router]`: the responder is the outermost
//! leave stage, the api router the terminal enter stage.

use crate::ctx::Ctx;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tracing::trace;

/// A single stage in the interceptor chain.
///
/// All three callbacks default to no-ops, so middleware implements only
/// the phases it cares about. Callbacks borrow the context mutably for
/// the duration of the stage; anything they need to keep must be cloned
/// out.
pub trait Interceptor: Send + Sync + 'static {
    /// Name used in trace output.
    fn name(&self) -> &'static str {
        "anonymous"
    }

    /// Called on the way in, front to back.
    fn enter<'a>(&'a self, cx: &'a mut Ctx) -> BoxFuture<'a, ()> {
        let _ = cx;
        Box::pin(async {})
    }

    /// Called on the way out, back to front, when no error is pending.
    fn leave<'a>(&'a self, cx: &'a mut Ctx) -> BoxFuture<'a, ()> {
        let _ = cx;
        Box::pin(async {})
    }

    /// Called on the way out instead of [`Interceptor::leave`] while a
    /// [`ChainError`] is pending. A stage that handles the error takes it
    /// off the context; stages further out then see their `leave` phase.
    fn on_error<'a>(&'a self, cx: &'a mut Ctx) -> BoxFuture<'a, ()> {
        let _ = cx;
        Box::pin(async {})
    }
}

/// Run a chain to completion over `cx`.
pub(crate) async fn run(stages: &[Arc<dyn Interceptor>], cx: &mut Ctx) {
    let mut entered = 0;
    for stage in stages {
        trace!(stage = stage.name(), "chain enter");
        stage.enter(cx).await;
        entered += 1;
        if cx.error.is_some() {
            break;
        }
    }

    for stage in stages[..entered].iter().rev() {
        if cx.error.is_some() {
            trace!(stage = stage.name(), "chain error");
            stage.on_error(cx).await;
        } else {
            trace!(stage = stage.name(), "chain leave");
            stage.leave(cx).await;
        }
    }
}

/// An error recorded on the context by a chain stage.
///
/// Chain errors are peer-visible: when the offending request carried an
/// id, the responder renders the error into an `rpc-response` frame. They
/// never terminate the peer's router loop.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    /// No event handler is registered for the tag.
    #[error("Unhandled event: {0}")]
    UnhandledEvent(String),
    /// No rpc handler is registered for the name.
    #[error("Unhandled rpc-request: {0}")]
    UnhandledRpc(String),
    /// No subscription handler is registered for the name.
    #[error("Unhandled subscription request: {0}")]
    UnhandledSubscription(String),
    /// The handler does not accept the number of arguments provided.
    #[error("{name} does not accept {got} argument(s)")]
    ArityMismatch {
        /// The handler name.
        name: String,
        /// The number of arguments the request carried.
        got: usize,
    },
    /// A request that requires an id arrived without one.
    #[error("{0} request carried no id")]
    MissingId(&'static str),
    /// The handler itself failed; carries the rendered error chain.
    #[error("{0}")]
    Handler(String),
}

/// Render an error and its source chain into one line.
pub(crate) fn render_error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ctx::test_ctx;
    use std::sync::Mutex;

    /// Records the order in which its phases fire.
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_on_enter: bool,
        consume_error: bool,
    }

    impl Recorder {
        fn new(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name,
                log: log.clone(),
                fail_on_enter: false,
                consume_error: false,
            }
        }

        fn push(&self, phase: &str) {
            self.log.lock().unwrap().push(format!("{}:{phase}", self.name));
        }
    }

    impl Interceptor for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn enter<'a>(&'a self, cx: &'a mut Ctx) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                self.push("enter");
                if self.fail_on_enter {
                    cx.error = Some(ChainError::Handler("boom".into()));
                }
            })
        }

        fn leave<'a>(&'a self, _cx: &'a mut Ctx) -> BoxFuture<'a, ()> {
            Box::pin(async move { self.push("leave") })
        }

        fn on_error<'a>(&'a self, cx: &'a mut Ctx) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                self.push("error");
                if self.consume_error {
                    cx.error = None;
                }
            })
        }
    }

    #[tokio::test]
    async fn enter_in_order_leave_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stages: Vec<Arc<dyn Interceptor>> = vec![
            Arc::new(Recorder::new("a", &log)),
            Arc::new(Recorder::new("b", &log)),
        ];
        let (mut cx, _rx) = test_ctx();

        run(&stages, &mut cx).await;

        assert_eq!(
            *log.lock().unwrap(),
            ["a:enter", "b:enter", "b:leave", "a:leave"]
        );
    }

    #[tokio::test]
    async fn error_unwinds_through_on_error_until_consumed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let consumer = Recorder {
            consume_error: true,
            ..Recorder::new("a", &log)
        };
        let failer = Recorder {
            fail_on_enter: true,
            ..Recorder::new("c", &log)
        };
        let stages: Vec<Arc<dyn Interceptor>> = vec![
            Arc::new(consumer),
            Arc::new(Recorder::new("b", &log)),
            Arc::new(failer),
        ];
        let (mut cx, _rx) = test_ctx();

        run(&stages, &mut cx).await;

        // c fails on enter; c and b see the error; a consumes it and so
        // sees its own error phase, not leave. Nothing past c entered.
        assert_eq!(
            *log.lock().unwrap(),
            ["a:enter", "b:enter", "c:enter", "c:error", "b:error", "a:error"]
        );
        assert!(cx.error.is_none());
    }

    #[test]
    fn error_chains_render_with_sources() {
        #[derive(Debug, thiserror::Error)]
        #[error("outer")]
        struct Outer(#[source] Inner);

        #[derive(Debug, thiserror::Error)]
        #[error("inner")]
        struct Inner;

        assert_eq!(render_error_chain(&Outer(Inner)), "outer: inner");
    }
}
