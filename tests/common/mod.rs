use serde_json::{json, Value};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tether::{Api, Arity, Publication};
use tokio::sync::mpsc;

pub mod ws_client;

/// Handler-side observations for assertions.
#[derive(Debug, Default)]
pub struct Observed {
    /// Times the `ping` event handler ran.
    pub pings: AtomicUsize,
    /// Times a subscription stop hook ran.
    pub stops: AtomicUsize,
}

/// Instantiate an api for testing.
pub fn test_api(observed: Arc<Observed>) -> Api {
    let pings = observed.clone();
    let stops = observed;

    Api::new()
        .event("ping", Arity::variadic(), move |_args| {
            let pings = pings.clone();
            async move {
                pings.pings.fetch_add(1, Ordering::SeqCst);
            }
        })
        .rpc("add-two", 2, |args: Vec<Value>| async move {
            let (a, b) = (args[0].as_i64().unwrap_or(0), args[1].as_i64().unwrap_or(0));
            Ok::<_, &str>(a + b)
        })
        .rpc("boom", Arity::variadic(), |_args| async {
            Err::<Value, _>("kaboom")
        })
        .subscription("count-to", 1, move |args: Vec<Value>| {
            let stops = stops.clone();
            async move {
                let n = args[0].as_i64().ok_or("count-to wants a number")?;
                let (tx, rx) = mpsc::channel(8);
                tokio::spawn(async move {
                    for i in 1..=n {
                        if tx.send(json!(i * 10)).await.is_err() {
                            break;
                        }
                    }
                });
                Ok::<_, &str>(Publication::with_stop(rx, move || {
                    stops.stops.fetch_add(1, Ordering::SeqCst);
                }))
            }
        })
}

/// Test clients.
pub trait TestClient {
    async fn send_msg<S: serde::Serialize>(&mut self, msg: &S);
    async fn recv<D: serde::de::DeserializeOwned>(&mut self) -> D;
}

/// Basic scenarios shared by the transport tests. Assumes the handshake
/// already happened.
pub async fn basic_tests<T: TestClient>(client: &mut T) {
    // rpc with a result
    client
        .send_msg(&json!({"event": "rpc", "fn": "add-two", "args": [2, 3], "id": "r1"}))
        .await;
    let next: Value = client.recv().await;
    assert_eq!(
        next,
        json!({"event": "rpc-response", "id": "r1", "result": 5})
    );

    // unknown rpc
    client
        .send_msg(&json!({"event": "rpc", "fn": "nope", "args": [], "id": "r2"}))
        .await;
    let next: Value = client.recv().await;
    assert_eq!(next["id"], json!("r2"));
    assert!(next["error"]
        .as_str()
        .unwrap()
        .contains("Unhandled rpc-request"));

    // a throwing handler answers with an error and takes nothing down
    client
        .send_msg(&json!({"event": "rpc", "fn": "boom", "args": [], "id": "r3"}))
        .await;
    let next: Value = client.recv().await;
    assert_eq!(next["error"], json!("kaboom"));

    client
        .send_msg(&json!({"event": "rpc", "fn": "add-two", "args": [20, 22], "id": "r4"}))
        .await;
    let next: Value = client.recv().await;
    assert_eq!(next["result"], json!(42));

    // subscription values arrive in emission order
    client
        .send_msg(&json!({"event": "subscription", "fn": "count-to", "args": [3], "id": "s1"}))
        .await;
    for expected in [10, 20, 30] {
        let next: Value = client.recv().await;
        assert_eq!(
            next,
            json!({"event": "publication", "id": "s1", "value": expected})
        );
    }
}
