//! The plain-HTTP shim: synchronous REST access to rpc and event
//! handlers.
//!
//! This path maps URL components to handler names and bypasses the
//! router and interceptor chain entirely; it exists for clients that
//! cannot hold a duplex connection. Subscriptions have no REST
//! rendition.

use crate::{
    api::ApiHandle,
    chain::{render_error_chain, ChainError},
    types::{Message, MsgId},
};
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct RestBody {
    id: Option<MsgId>,
    #[serde(default)]
    args: Vec<Value>,
}

/// Build an [`axum::Router`] exposing `POST /api/v1/{category}/{fn}`
/// over the given handler dictionary.
///
/// The request body is `{id, args?}`; a JSON object describing the
/// transport request (method and uri) is prepended to `args` before
/// invocation, so handlers exposed here declare one extra argument.
/// Success answers `{event: "rpc-response", id, result}` with status
/// 200; failures answer `{error}` with status 500. Only
/// `application/json` bodies are accepted.
pub fn rest_router(api: impl Into<ApiHandle>) -> Router {
    Router::new()
        .route("/api/v1/{category}/{name}", post(dispatch))
        .with_state(api.into())
}

async fn dispatch(
    State(api): State<ApiHandle>,
    Path((category, name)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: bytes::Bytes,
) -> Response {
    if !is_json(&headers) {
        return StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response();
    }

    let RestBody { id, args: rest } = match serde_json::from_slice(&body) {
        Ok(b) => b,
        Err(err) => return fail(&err.to_string()),
    };

    // The transport request rides along as the first argument.
    let mut args = vec![json!({ "method": method.as_str(), "uri": uri.to_string() })];
    args.extend(rest);

    let api = api.snapshot();
    match category.as_str() {
        "rpc" => {
            let Some(entry) = api.rpc_entry(&name) else {
                return fail(&ChainError::UnhandledRpc(name).to_string());
            };
            if !entry.arity.accepts(args.len()) {
                return fail(
                    &ChainError::ArityMismatch {
                        name,
                        got: args.len(),
                    }
                    .to_string(),
                );
            }
            match (entry.f)(args).await {
                Ok(result) => Json(Message::rpc_response(id, result)).into_response(),
                Err(err) => fail(&render_error_chain(err.as_ref())),
            }
        }
        "event" => {
            let Some(entry) = api.event_entry(&name) else {
                return fail(&ChainError::UnhandledEvent(name).to_string());
            };
            if !entry.arity.accepts(args.len()) {
                return fail(
                    &ChainError::ArityMismatch {
                        name,
                        got: args.len(),
                    }
                    .to_string(),
                );
            }
            (entry.f)(args).await;
            Json(Message::rpc_response(id, Value::Null)).into_response()
        }
        _ => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "unsupported category" })),
        )
            .into_response(),
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"))
}

fn fail(message: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": message })),
    )
        .into_response()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Api;

    fn shim() -> Router {
        let api = Api::new()
            .rpc("add-two", 3, |args: Vec<Value>| async move {
                let (a, b) = (args[1].as_i64().unwrap_or(0), args[2].as_i64().unwrap_or(0));
                Ok::<_, &str>(a + b)
            })
            .event("touch", crate::Arity::variadic(), |_| async {});
        rest_router(api)
    }

    async fn oneshot(
        router: Router,
        request: axum::http::Request<axum::body::Body>,
    ) -> (StatusCode, Value) {
        use tower::ServiceExt;

        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn call(router: Router, path: &str, body: Value) -> (StatusCode, Value) {
        let request = axum::http::Request::post(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(axum::body::Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        oneshot(router, request).await
    }

    #[tokio::test]
    async fn rpc_over_rest() {
        let (status, body) = call(
            shim(),
            "/api/v1/rpc/add-two",
            json!({ "id": "h1", "args": [2, 3] }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({ "event": "rpc-response", "id": "h1", "result": 5 })
        );
    }

    #[tokio::test]
    async fn unknown_rpc_is_a_500() {
        let (status, body) = call(shim(), "/api/v1/rpc/nope", json!({ "id": 1 })).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains("Unhandled rpc-request"));
    }

    #[tokio::test]
    async fn non_json_bodies_are_rejected() {
        use axum::body::Body;
        let request = axum::http::Request::post("/api/v1/rpc/add-two")
            .header(header::CONTENT_TYPE, "application/transit+json")
            .body(Body::from("[]"))
            .unwrap();
        let (status, _) = oneshot(shim(), request).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
}
