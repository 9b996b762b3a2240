//! Core wire types, like [`Message`] and [`MsgId`].

mod msg;
pub use msg::{ConnectReply, Message, MessageKind, MsgId};

mod error;
pub use error::DecodeError;

pub(crate) const ID_LEN_LIMIT: usize = 80;
pub(crate) const NAME_LEN_LIMIT: usize = 80;
