#![cfg(feature = "ws")]

use super::TestClient;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::{
    tungstenite::{client::IntoClientRequest, Message},
    MaybeTlsStream, WebSocketStream,
};

/// Create a WebSocket client for testing. Performs the handshake and
/// asserts the connect acknowledgement.
#[allow(dead_code)]
pub async fn ws_client(url: &str, peer_id: &str) -> WsClient {
    let request = url.into_client_request().unwrap();
    let (socket, _) = tokio_tungstenite::connect_async(request).await.unwrap();

    let mut client = WsClient { socket };
    client.send_msg(&json!({ "peer-id": peer_id })).await;
    let ack: Value = client.recv().await;
    assert_eq!(ack, json!({ "type": "connect-reply", "success": true }));
    client
}

pub struct WsClient {
    socket: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

impl WsClient {
    async fn send_inner<S: serde::Serialize>(&mut self, msg: &S) {
        self.socket
            .send(Message::Text(serde_json::to_string(msg).unwrap().into()))
            .await
            .unwrap();
    }

    async fn recv_inner<D: serde::de::DeserializeOwned>(&mut self) -> D {
        match self.socket.next().await.unwrap().unwrap() {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            _ => panic!("unexpected message type"),
        }
    }
}

impl TestClient for WsClient {
    async fn send_msg<S: serde::Serialize>(&mut self, msg: &S) {
        self.send_inner(msg).await;
    }

    async fn recv<D: serde::de::DeserializeOwned>(&mut self) -> D {
        self.recv_inner().await
    }
}
