use crate::types::{ConnectReply, DecodeError, Message};
use serde_json::value::{to_raw_value, RawValue};

/// The wire encoding used on both directions of a connection.
///
/// Selected per listener with [`ListenerBuilder::codec`]. The shipped
/// implementation is [`JsonCodec`]; a custom codec can layer a different
/// self-describing encoding over the same [`Message`] grammar.
///
/// [`ListenerBuilder::codec`]: crate::ListenerBuilder::codec
pub trait Codec: Send + Sync + 'static {
    /// Encode an outbound message.
    fn encode(&self, msg: &Message) -> Result<Box<RawValue>, serde_json::Error>;

    /// Encode the handshake acknowledgement.
    fn encode_reply(&self, reply: &ConnectReply) -> Result<Box<RawValue>, serde_json::Error>;

    /// Decode an inbound frame.
    fn decode(&self, frame: &[u8]) -> Result<Message, DecodeError>;
}

/// Plain JSON framing: one JSON object per frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, msg: &Message) -> Result<Box<RawValue>, serde_json::Error> {
        to_raw_value(msg)
    }

    fn encode_reply(&self, reply: &ConnectReply) -> Result<Box<RawValue>, serde_json::Error> {
        to_raw_value(reply)
    }

    fn decode(&self, frame: &[u8]) -> Result<Message, DecodeError> {
        Message::decode_json(frame)
    }
}
