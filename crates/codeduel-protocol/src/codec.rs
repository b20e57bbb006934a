//! Codec trait and the JSON implementation.
//!
//! The router never calls `serde_json` directly; it goes through a
//! [`Codec`] so the framing can be swapped without touching handlers.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Encodes values to bytes and decodes bytes back.
///
/// `Send + Sync + 'static` because one codec instance is shared by every
/// connection task.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Encode`] if the value cannot be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] if the bytes are malformed or do
    /// not match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// A [`Codec`] that uses JSON, the format the browser client speaks.
///
/// ```rust
/// use codeduel_protocol::{ClientEvent, Codec, JsonCodec, Tier};
///
/// let codec = JsonCodec;
/// let frame = br#"{"event":"queue:join","data":{"difficulty":"medium"}}"#;
/// let event: ClientEvent = codec.decode(frame).unwrap();
/// assert_eq!(event, ClientEvent::QueueJoin { difficulty: Tier::Medium });
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ServerEvent, Tier};

    #[test]
    fn test_json_codec_encodes_server_event_as_text_json() {
        let bytes = JsonCodec
            .encode(&ServerEvent::QueueLeft {
                difficulty: Some(Tier::Easy),
            })
            .unwrap();
        let text = std::str::from_utf8(&bytes).expect("JSON is UTF-8");
        assert!(text.contains(r#""event":"queue:left""#));
    }

    #[test]
    fn test_json_codec_decode_garbage_is_decode_error() {
        let result: Result<ServerEvent, _> = JsonCodec.decode(b"not json");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
