//! JSON encoding of protocol messages.

use crate::error::ProtocolResult;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a message to JSON bytes.
pub fn encode<T: Serialize>(message: &T) -> ProtocolResult<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

/// Decodes a message from JSON bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use crate::messages::ChangesRequest;

    #[test]
    fn decode_garbage_is_codec_error() {
        let result: ProtocolResult<ChangesRequest> = decode(b"not json");
        assert!(matches!(result, Err(ProtocolError::Codec(_))));
    }

    #[test]
    fn encode_is_plain_json() {
        let bytes = encode(&ChangesRequest::new(None, 10)).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, serde_json::json!({"limit": 10}));
    }
}
