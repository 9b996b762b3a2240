#![cfg(feature = "ws")]

mod common;
use common::{test_api, ws_client::ws_client, Observed, TestClient};

use serde_json::{json, Value};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{atomic::Ordering, Arc};
use tether::{
    pubsub::{Bind, ServerShutdown},
    Listener,
};

const WS_SOCKET: SocketAddr =
    SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 4271);
const WS_SOCKET_STR: &str = "ws://127.0.0.1:4271";

async fn serve_ws() -> (ServerShutdown, Listener, Arc<Observed>) {
    let observed = Arc::new(Observed::default());
    let listener = Listener::new(test_api(observed.clone()));
    let shutdown = WS_SOCKET.serve(listener.clone()).await.unwrap();
    (shutdown, listener, observed)
}

#[tokio::test]
async fn basic_ws() {
    let (_server, listener, observed) = serve_ws().await;

    let mut client = ws_client(WS_SOCKET_STR, "ws-peer").await;
    assert!(listener.peers().contains("ws-peer"));

    common::basic_tests(&mut client).await;

    // events fire and forget: the handler runs, no frame comes back
    client
        .send_msg(&json!({ "event": "ping", "args": [42] }))
        .await;
    client
        .send_msg(&json!({"event": "rpc", "fn": "add-two", "args": [1, 1], "id": "fence"}))
        .await;
    let next: Value = client.recv().await;
    assert_eq!(next["id"], json!("fence"));
    assert_eq!(observed.pings.load(Ordering::SeqCst), 1);

    // the count-to producer exhausted itself, which runs the stop hook
    let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(1);
    while observed.stops.load(Ordering::SeqCst) != 1 {
        assert!(tokio::time::Instant::now() < deadline, "stop hook never ran");
        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
    }

    // unsubscribing an already-exhausted subscription is a no-op
    client
        .send_msg(&json!({ "event": "unsubscription", "id": "s1" }))
        .await;
    drop(client);

    // the peer record goes away with the connection
    let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(1);
    while listener.peers().contains("ws-peer") {
        assert!(tokio::time::Instant::now() < deadline, "peer never removed");
        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
    }
}
