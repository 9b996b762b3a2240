use crate::types::{DecodeError, ID_LEN_LIMIT, NAME_LEN_LIMIT};
use core::fmt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A correlation identifier.
///
/// Ids are opaque and chosen by the peer. They are unique per-peer for
/// in-flight requests, and are echoed verbatim on responses and
/// publications. JSON strings and integers are accepted; anything else is
/// a decode error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MsgId {
    /// An integer id.
    Num(i64),
    /// A string id.
    Str(String),
}

impl fmt::Display for MsgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for MsgId {
    fn from(n: i64) -> Self {
        Self::Num(n)
    }
}

impl From<&str> for MsgId {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for MsgId {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

/// Classification of an inbound [`Message`] by its `event` tag.
///
/// The reserved outbound tags (`rpc-response`, `publication`,
/// `connect-reply`) are never produced by classification; a peer that
/// sends them is treated as sending a user event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind<'a> {
    /// A request/response invocation (`event: "rpc"`).
    Rpc,
    /// A stream-open request (`event: "subscription"`).
    Subscription,
    /// A stream-close request (`event: "unsubscription"`).
    Unsubscription,
    /// Anything else: a fire-and-forget user event. `None` when the
    /// message carried no `event` tag at all.
    Event(Option<&'a str>),
}

/// A single frame on the wire, inbound or outbound.
///
/// Every field is optional on the wire; which ones are present depends on
/// the message kind. Unknown fields are preserved in [`Message::extra`] so
/// that middleware can read or rewrite them without the core caring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Tag naming the message kind. See [`Message::kind`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,

    /// Correlation id, echoed on responses and publications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MsgId>,

    /// Name of the handler to invoke (`rpc` and `subscription` only).
    #[serde(rename = "fn", default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Positional arguments for the handler.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,

    /// Successful RPC result (outbound only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// A single value emitted by a subscription (outbound only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// Failure description (outbound only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// The peer's self-declared identifier (handshake frame only).
    #[serde(rename = "peer-id", default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,

    /// Unknown fields ride along untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    /// Reserved tag for request/response invocations.
    pub const RPC: &'static str = "rpc";
    /// Reserved tag for stream-open requests.
    pub const SUBSCRIPTION: &'static str = "subscription";
    /// Reserved tag for stream-close requests.
    pub const UNSUBSCRIPTION: &'static str = "unsubscription";
    /// Reserved tag for RPC responses (outbound).
    pub const RPC_RESPONSE: &'static str = "rpc-response";
    /// Reserved tag for subscription values (outbound).
    pub const PUBLICATION: &'static str = "publication";

    /// Build a user event message.
    pub fn event(tag: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            event: Some(tag.into()),
            args,
            ..Self::default()
        }
    }

    /// Build an RPC request.
    pub fn rpc(method: impl Into<String>, args: Vec<Value>, id: impl Into<MsgId>) -> Self {
        Self {
            event: Some(Self::RPC.into()),
            method: Some(method.into()),
            args,
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Build a subscription request.
    pub fn subscription(method: impl Into<String>, args: Vec<Value>, id: impl Into<MsgId>) -> Self {
        Self {
            event: Some(Self::SUBSCRIPTION.into()),
            method: Some(method.into()),
            args,
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Build an unsubscription request.
    pub fn unsubscription(id: impl Into<MsgId>) -> Self {
        Self {
            event: Some(Self::UNSUBSCRIPTION.into()),
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Build a successful RPC response, echoing the request id.
    pub fn rpc_response(id: Option<MsgId>, result: Value) -> Self {
        Self {
            event: Some(Self::RPC_RESPONSE.into()),
            id,
            result: Some(result),
            ..Self::default()
        }
    }

    /// Build a failed RPC response, echoing the request id.
    pub fn rpc_error(id: Option<MsgId>, error: impl fmt::Display) -> Self {
        Self {
            event: Some(Self::RPC_RESPONSE.into()),
            id,
            error: Some(error.to_string()),
            ..Self::default()
        }
    }

    /// Build a publication frame for a subscription value.
    pub fn publication(id: MsgId, value: Value) -> Self {
        Self {
            event: Some(Self::PUBLICATION.into()),
            id: Some(id),
            value: Some(value),
            ..Self::default()
        }
    }

    /// Classify this message by its `event` tag.
    pub fn kind(&self) -> MessageKind<'_> {
        match self.event.as_deref() {
            Some(Self::RPC) => MessageKind::Rpc,
            Some(Self::SUBSCRIPTION) => MessageKind::Subscription,
            Some(Self::UNSUBSCRIPTION) => MessageKind::Unsubscription,
            other => MessageKind::Event(other),
        }
    }

    /// Decode a frame from JSON bytes, enforcing id and name size limits.
    pub fn decode_json(frame: &[u8]) -> Result<Self, DecodeError> {
        let msg: Self = serde_json::from_slice(frame)?;

        if let Some(MsgId::Str(s)) = &msg.id {
            if s.len() > ID_LEN_LIMIT {
                return Err(DecodeError::IdTooLarge(s.len()));
            }
        }
        for name in [&msg.event, &msg.method].into_iter().flatten() {
            if name.len() > NAME_LEN_LIMIT {
                return Err(DecodeError::NameTooLarge(name.len()));
            }
        }

        Ok(msg)
    }
}

/// The acknowledgement written to a peer after a successful handshake.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ConnectReply {
    /// Always `"connect-reply"`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Whether the handshake succeeded.
    pub success: bool,
}

impl ConnectReply {
    pub(crate) const OK: Self = Self {
        kind: "connect-reply",
        success: true,
    };
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn classification() {
        assert_eq!(Message::rpc("f", vec![], 1).kind(), MessageKind::Rpc);
        assert_eq!(
            Message::subscription("f", vec![], 1).kind(),
            MessageKind::Subscription
        );
        assert_eq!(
            Message::unsubscription(1).kind(),
            MessageKind::Unsubscription
        );
        assert_eq!(
            Message::event("ping", vec![]).kind(),
            MessageKind::Event(Some("ping"))
        );
        assert_eq!(Message::default().kind(), MessageKind::Event(None));
        // Outbound-only tags are not special on the inbound side.
        assert_eq!(
            Message::rpc_response(None, json!(1)).kind(),
            MessageKind::Event(Some("rpc-response"))
        );
    }

    #[test]
    fn unknown_fields_survive_a_round_trip() {
        let frame = br#"{"event":"rpc","fn":"add","args":[1,2],"id":"r1","trace-ctx":{"a":1}}"#;
        let msg = Message::decode_json(frame).unwrap();
        assert_eq!(msg.extra["trace-ctx"], json!({"a": 1}));

        let encoded = serde_json::to_value(&msg).unwrap();
        assert_eq!(encoded["trace-ctx"], json!({"a": 1}));
        assert_eq!(encoded["fn"], json!("add"));
    }

    #[test]
    fn ids_are_strings_or_integers() {
        let msg = Message::decode_json(br#"{"event":"rpc","fn":"f","id":7}"#).unwrap();
        assert_eq!(msg.id, Some(MsgId::Num(7)));

        let msg = Message::decode_json(br#"{"event":"rpc","fn":"f","id":"r1"}"#).unwrap();
        assert_eq!(msg.id, Some(MsgId::Str("r1".into())));
    }

    #[test]
    fn oversized_ids_are_rejected() {
        let id = "x".repeat(81);
        let frame = serde_json::to_vec(&json!({ "event": "rpc", "id": id })).unwrap();
        assert!(matches!(
            Message::decode_json(&frame),
            Err(DecodeError::IdTooLarge(81))
        ));
    }

    #[test]
    fn none_fields_are_omitted_on_the_wire() {
        let out = serde_json::to_string(&Message::rpc_response(Some(1.into()), json!(5))).unwrap();
        assert_eq!(out, r#"{"event":"rpc-response","id":1,"result":5}"#);
    }
}
