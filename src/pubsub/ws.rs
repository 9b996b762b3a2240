use crate::{
    peer::Origin,
    pubsub::{Bind, FrameSink, Transport},
};
use bytes::Bytes;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, Stream, StreamExt,
};
use serde_json::value::RawValue;
use std::{
    future::Future,
    net::SocketAddr,
    pin::Pin,
    task::{ready, Context, Poll},
};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        protocol::Message,
    },
    WebSocketStream,
};
use tracing::{debug, debug_span, Instrument};

/// Sending half of a [`WebSocketStream`].
pub(crate) type SendHalf = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Receiving half of a [`WebSocketStream`].
pub(crate) type RecvHalf = SplitStream<WebSocketStream<TcpStream>>;

/// Stream adapter extracting text frames from a [`WebSocketStream`].
#[derive(Debug)]
pub struct WsFrameStream {
    inner: RecvHalf,
    complete: bool,
}

impl From<RecvHalf> for WsFrameStream {
    fn from(inner: RecvHalf) -> Self {
        Self {
            inner,
            complete: false,
        }
    }
}

impl WsFrameStream {
    /// Handle an incoming [`Message`].
    fn handle(&self, message: Message) -> Result<Option<Bytes>, &'static str> {
        match message {
            Message::Text(text) => Ok(Some(text.into())),
            Message::Close(Some(frame)) => {
                let s = "Received close frame with data";
                debug!(reason = %frame, "{}", &s);
                Err(s)
            }
            Message::Close(None) => {
                let s = "WS peer has gone away";
                debug!("{}", &s);
                Err(s)
            }
            _ => Ok(None),
        }
    }
}

impl Stream for WsFrameStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if self.complete {
                return Poll::Ready(None);
            }

            let Some(Ok(msg)) = ready!(self.inner.poll_next_unpin(cx)) else {
                self.complete = true;
                return Poll::Ready(None);
            };

            match self.handle(msg) {
                Ok(Some(item)) => return Poll::Ready(Some(item)),
                Ok(None) => continue,
                Err(_) => self.complete = true,
            }
        }
    }
}

impl FrameSink for SendHalf {
    type Error = tokio_tungstenite::tungstenite::Error;

    async fn send_json(&mut self, json: Box<RawValue>) -> Result<(), Self::Error> {
        self.send(Message::text(json.get())).await
    }
}

impl Transport for TcpListener {
    type Sink = SendHalf;

    type Stream = WsFrameStream;

    type Error = tokio_tungstenite::tungstenite::Error;

    async fn accept(&self) -> Result<(Self::Sink, Self::Stream, Origin), Self::Error> {
        let (stream, remote_addr) = self.accept().await?;

        let span = debug_span!("ws connection", %remote_addr);

        let mut path = None;
        let ws_stream = accept_hdr_async(stream, |req: &Request, resp: Response| {
            path = Some(req.uri().path().to_owned());
            Ok::<_, ErrorResponse>(resp)
        })
        .instrument(span)
        .await?;

        let (send, recv) = ws_stream.split();

        let origin = Origin {
            remote_addr: Some(remote_addr),
            path,
        };

        Ok((send, recv.into(), origin))
    }
}

impl Bind for SocketAddr {
    type Transport = TcpListener;
    type Error = std::io::Error;

    fn bind(self) -> impl Future<Output = Result<Self::Transport, Self::Error>> + Send {
        TcpListener::bind(self)
    }
}
