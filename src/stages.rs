//! The built-in chain stages: classification/dispatch and the responder.

use crate::{
    api::{Arity, Publication},
    chain::{render_error_chain, ChainError, Interceptor},
    ctx::Ctx,
    peer::{Peer, SubRecord},
    types::{Message, MsgId},
};
use futures_util::future::BoxFuture;
use std::sync::{Arc, Mutex};
use tracing::debug;

static LAST_HANDLER_ERROR: Mutex<Option<String>> = Mutex::new(None);

/// The most recent handler failure, process-wide.
///
/// Latched for diagnostics whenever an rpc or subscription handler
/// fails; observable but not load-bearing.
pub fn last_handler_error() -> Option<String> {
    LAST_HANDLER_ERROR
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
}

fn latch_handler_error(rendered: &str) {
    *LAST_HANDLER_ERROR.lock().unwrap_or_else(|e| e.into_inner()) = Some(rendered.to_owned());
}

/// The terminal chain stage: classifies the request by its `event` tag
/// and runs the matching handler.
///
/// Classification is independent of handler existence: a reserved tag
/// routes to its stage even when no handler is registered, and the stage
/// then records the unhandled error.
pub(crate) struct ApiRouter;

impl Interceptor for ApiRouter {
    fn name(&self) -> &'static str {
        "api-router"
    }

    fn enter<'a>(&'a self, cx: &'a mut Ctx) -> BoxFuture<'a, ()> {
        Box::pin(dispatch(cx))
    }
}

async fn dispatch(cx: &mut Ctx) {
    let tag = cx.request.event.clone();
    match tag.as_deref() {
        Some(Message::RPC) => on_rpc(cx).await,
        Some(Message::SUBSCRIPTION) => on_subscription(cx).await,
        Some(Message::UNSUBSCRIPTION) => on_unsubscription(cx),
        other => on_event(cx, other).await,
    }
}

fn check_arity(arity: &Arity, name: &str, got: usize) -> Result<(), ChainError> {
    if arity.accepts(got) {
        Ok(())
    } else {
        Err(ChainError::ArityMismatch {
            name: name.to_owned(),
            got,
        })
    }
}

async fn on_event(cx: &mut Ctx, tag: Option<&str>) {
    let Some(tag) = tag else {
        cx.error = Some(ChainError::UnhandledEvent("<untagged>".into()));
        return;
    };

    let api = Arc::clone(&cx.api);
    let Some(entry) = api.event_entry(tag) else {
        cx.error = Some(ChainError::UnhandledEvent(tag.to_owned()));
        return;
    };

    if let Err(err) = check_arity(&entry.arity, tag, cx.request.args.len()) {
        cx.error = Some(err);
        return;
    }

    // Return value ignored.
    (entry.f)(cx.request.args.clone()).await;
}

async fn on_rpc(cx: &mut Ctx) {
    let Some(name) = cx.request.method.clone() else {
        cx.error = Some(ChainError::UnhandledRpc("<missing fn>".into()));
        return;
    };

    let api = Arc::clone(&cx.api);
    let Some(entry) = api.rpc_entry(&name) else {
        cx.error = Some(ChainError::UnhandledRpc(name));
        return;
    };

    if let Err(err) = check_arity(&entry.arity, &name, cx.request.args.len()) {
        cx.error = Some(err);
        return;
    }

    match (entry.f)(cx.request.args.clone()).await {
        Ok(result) => {
            cx.response = Some(Message::rpc_response(cx.request.id.clone(), result));
        }
        Err(err) => {
            let rendered = render_error_chain(err.as_ref());
            latch_handler_error(&rendered);
            cx.error = Some(ChainError::Handler(rendered));
        }
    }
}

async fn on_subscription(cx: &mut Ctx) {
    let Some(name) = cx.request.method.clone() else {
        cx.error = Some(ChainError::UnhandledSubscription("<missing fn>".into()));
        return;
    };
    let Some(id) = cx.request.id.clone() else {
        cx.error = Some(ChainError::MissingId("subscription"));
        return;
    };

    let api = Arc::clone(&cx.api);
    let Some(entry) = api.subscription_entry(&name) else {
        cx.error = Some(ChainError::UnhandledSubscription(name));
        return;
    };

    if let Err(err) = check_arity(&entry.arity, &name, cx.request.args.len()) {
        cx.error = Some(err);
        return;
    }

    let publication = match (entry.f)(cx.request.args.clone()).await {
        Ok(p) => p,
        Err(err) => {
            let rendered = render_error_chain(err.as_ref());
            latch_handler_error(&rendered);
            cx.error = Some(ChainError::Handler(rendered));
            return;
        }
    };

    let Some(peer) = cx.peers.get(&cx.peer_id) else {
        // The peer disconnected while the handler ran. There is nothing
        // to attach the pipeline to; run the stop hook and drop the
        // producer.
        if let Some(stop) = publication.stop {
            stop();
        }
        return;
    };

    install_pipeline(&peer, id, publication);
}

/// Wire a producer up to the peer's sink: register the subscription
/// record, then forward each value as a publication frame until the
/// producer or the sink closes.
fn install_pipeline(peer: &Arc<Peer>, id: MsgId, publication: Publication) {
    let Publication { mut chan, stop } = publication;

    let tasks = peer.tasks.child();
    if let Some(old) = peer.register_subscription(id.clone(), SubRecord::new(stop, tasks.clone())) {
        debug!(sub_id = %id, "subscription id reused; closing previous producer");
        old.close();
    }

    let mut sink = peer.sink();
    let peer = Arc::clone(peer);
    tasks.spawn_cancellable(async move {
        while let Some(value) = chan.recv().await {
            if sink
                .send(&Message::publication(id.clone(), value))
                .await
                .is_err()
            {
                break;
            }
        }

        // Producer exhausted or sink gone: the pipeline cleans up its
        // own record. An unsubscription that raced us finds the map
        // empty and no-ops.
        if let Some(rec) = peer.remove_subscription(&id) {
            rec.close();
        }
    });
}

fn on_unsubscription(cx: &mut Ctx) {
    let Some(id) = cx.request.id.clone() else {
        cx.error = Some(ChainError::MissingId("unsubscription"));
        return;
    };

    let Some(peer) = cx.peers.get(&cx.peer_id) else {
        return;
    };

    // Removal and closure are one step; a second unsubscription for the
    // same id finds nothing.
    if let Some(rec) = peer.remove_subscription(&id) {
        rec.close();
    }
}

/// The outermost leave stage: writes the chain's outcome to the peer.
///
/// On a clean leave, writes the response (if the chain produced one). On
/// a chain error, consumes the error, renders it into an `rpc-response`
/// frame when the request carried an id, and records that frame as the
/// context response.
pub(crate) struct Responder;

impl Interceptor for Responder {
    fn name(&self) -> &'static str {
        "responder"
    }

    fn leave<'a>(&'a self, cx: &'a mut Ctx) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if let Some(response) = cx.response.clone() {
                // The peer may be mid-disconnect; the chain run is done
                // either way.
                let _ = cx.sink.send(&response).await;
            }
        })
    }

    fn on_error<'a>(&'a self, cx: &'a mut Ctx) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let Some(err) = cx.error.take() else { return };

            match cx.request.id.clone() {
                Some(id) => {
                    let response = Message::rpc_error(Some(id), &err);
                    let _ = cx.sink.send(&response).await;
                    cx.response = Some(response);
                }
                None => {
                    debug!(%err, peer_id = %cx.peer_id, "chain error for a message without an id");
                }
            }
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{chain, ctx::test_ctx, Api};
    use serde_json::{json, Value};

    fn stages() -> Vec<Arc<dyn Interceptor>> {
        vec![Arc::new(Responder), Arc::new(ApiRouter)]
    }

    fn add_two() -> Api {
        Api::new().rpc("add-two", 2, |args: Vec<Value>| async move {
            let (a, b) = (args[0].as_i64().unwrap_or(0), args[1].as_i64().unwrap_or(0));
            Ok::<_, &str>(a + b)
        })
    }

    async fn run_one(api: Api, request: Message) -> Option<Value> {
        let (mut cx, mut rx) = test_ctx();
        cx.api = Arc::new(api);
        cx.request = request;
        chain::run(&stages(), &mut cx).await;
        rx.try_recv()
            .ok()
            .map(|item| serde_json::from_str(item.json.get()).unwrap())
    }

    #[tokio::test]
    async fn rpc_response_correlates_by_id() {
        let out = run_one(add_two(), Message::rpc("add-two", vec![json!(2), json!(3)], "r1"))
            .await
            .unwrap();
        assert_eq!(
            out,
            json!({"event": "rpc-response", "id": "r1", "result": 5})
        );
    }

    #[tokio::test]
    async fn unknown_rpc_reports_unhandled() {
        let out = run_one(Api::new(), Message::rpc("nope", vec![], "r2"))
            .await
            .unwrap();
        assert_eq!(out["id"], json!("r2"));
        assert!(out["error"]
            .as_str()
            .unwrap()
            .contains("Unhandled rpc-request"));
        assert!(out.get("result").is_none());
    }

    #[tokio::test]
    async fn arity_mismatch_reports_an_error() {
        let out = run_one(add_two(), Message::rpc("add-two", vec![json!(1)], "r3"))
            .await
            .unwrap();
        assert!(out["error"]
            .as_str()
            .unwrap()
            .contains("does not accept 1 argument"));
    }

    #[tokio::test]
    async fn handler_failure_is_rendered_and_latched() {
        let api = Api::new().rpc("boom", 0, |_| async { Err::<Value, _>("kaboom") });
        let out = run_one(api, Message::rpc("boom", vec![], "r4")).await.unwrap();
        assert_eq!(out["error"], json!("kaboom"));
        assert_eq!(last_handler_error().as_deref(), Some("kaboom"));
    }

    #[tokio::test]
    async fn errors_without_an_id_produce_no_frame() {
        let out = run_one(Api::new(), Message::event("nobody-home", vec![])).await;
        assert!(out.is_none());
    }
}
