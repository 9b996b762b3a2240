use crate::types::DecodeError;
use std::borrow::Cow;

/// Errors that can occur when registering a handler.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistrationError {
    /// A handler with this name is already registered in the bucket.
    #[error("Handler already registered: {0}")]
    HandlerAlreadyRegistered(Cow<'static, str>),
}

impl RegistrationError {
    /// Create a new `HandlerAlreadyRegistered` error.
    pub fn handler_already_registered(name: impl Into<Cow<'static, str>>) -> Self {
        Self::HandlerAlreadyRegistered(name.into())
    }
}

/// Errors that can occur while accepting a new peer connection.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// The connection closed before the first frame arrived.
    #[error("connection closed before the first frame")]
    Closed,
    /// The first frame did not decode.
    #[error("failed to decode handshake frame: {0}")]
    Decode(#[from] DecodeError),
    /// The first frame carried no `peer-id` field.
    #[error("handshake frame carried no peer-id")]
    MissingPeerId,
    /// The connect reply could not be encoded.
    #[error("failed to encode connect reply: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Errors surfaced to the listener's `on_error` callback.
///
/// These are transport-adjacent failures: everything that happens inside
/// the interceptor chain is reported to the offending peer as an
/// `rpc-response` error instead.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// A new connection failed its handshake.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    /// An inbound frame from an established peer did not decode. The
    /// frame is dropped; the connection stays up.
    #[error("failed to decode inbound frame: {0}")]
    Decode(#[from] DecodeError),
    /// The transport failed to accept a connection.
    #[error("failed to accept connection: {0}")]
    Accept(#[source] Box<dyn std::error::Error + Send + Sync>),
}
