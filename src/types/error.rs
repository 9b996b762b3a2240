/// Error when decoding an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The frame was not valid JSON.
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Id is too large.
    ///
    /// The limit is 80 bytes. 80 is selected as a reasonable limit for
    /// most use-cases, and will hold UUIDs as well as 0x-prefixed 256-bit
    /// hashes encoded as hex. If you need to send a large id, consider
    /// not doing that.
    #[error("Id is too large, limit of 80 bytes. Got: {0}")]
    IdTooLarge(usize),

    /// A handler or event name is too large.
    ///
    /// The limit is 80 bytes. 80 is selected as a reasonable limit for
    /// most use-cases. If you need to send a large name, consider not
    /// doing that.
    #[error("Name is too large, limit of 80 bytes. Got: {0}")]
    NameTooLarge(usize),
}
