/// A frame that could not cross the wire.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// An outbound event could not be serialized.
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// An inbound frame was not valid JSON, named an unknown `event`, or
    /// carried a payload of the wrong shape.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame parsed but is not allowed here, such as a second `auth`.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
