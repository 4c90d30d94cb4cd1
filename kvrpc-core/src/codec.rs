//! Codec for envelopes and the values they carry
//!
//! Two layers of encoding meet here:
//!
//! - **Envelope**: the outer `{id, params}` / `{id, result|error}` JSON
//!   object, handled by [`decode_request`] and [`encode_response`].
//! - **Values**: each parameter and each result is a JSON document stored as
//!   a string inside the envelope. [`decode_param`] and [`encode_result`]
//!   convert between those strings and Rust types.
//!
//! The value layer is the pluggable serializer: any type with serde
//! `Serialize`/`Deserialize` implementations can travel as a parameter or a
//! result without the envelope knowing about it.
//!
//! All functions are pure and have no side effects.
//!
//! # Examples
//!
//! ```rust
//! use kvrpc_core::codec;
//!
//! let req = codec::decode_request(br#"{"id":7,"params":["\"Alice\"","30"]}"#).unwrap();
//! let name: String = codec::decode_param(0, req.params[0].as_deref()).unwrap();
//! let age: u32 = codec::decode_param(1, req.params[1].as_deref()).unwrap();
//! assert_eq!((name.as_str(), age), ("Alice", 30));
//! ```

use crate::error::{Error, Result};
use crate::types::{RpcRequest, RpcResponse};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encoded form of an absent parameter
const NULL: &str = "null";

/// Decode a request envelope from raw bytes
///
/// # Errors
///
/// Returns `Error::MalformedEnvelope` when the payload is not JSON or does
/// not have the envelope's shape (for example a missing or non-integer id).
pub fn decode_request(data: &[u8]) -> Result<RpcRequest> {
    serde_json::from_slice(data).map_err(|e| Error::MalformedEnvelope(e.to_string()))
}

/// Decode a request envelope from a text frame
pub fn decode_request_text(text: &str) -> Result<RpcRequest> {
    decode_request(text.as_bytes())
}

/// Encode a request envelope (used by callers and tests)
pub fn encode_request(req: &RpcRequest) -> Result<String> {
    serde_json::to_string(req).map_err(|e| Error::Serialization(e.to_string()))
}

/// Encode a response envelope to wire text
pub fn encode_response(resp: &RpcResponse) -> Result<String> {
    serde_json::to_string(resp).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode a response envelope (used by callers and tests)
pub fn decode_response(text: &str) -> Result<RpcResponse> {
    serde_json::from_str(text).map_err(|e| Error::MalformedEnvelope(e.to_string()))
}

/// Decode one positional parameter
///
/// `None` is treated as the JSON literal `null`, so `Option<T>` parameters
/// accept a missing value.
///
/// # Errors
///
/// Returns `Error::ParameterDecode` carrying the parameter position and the
/// decoder's message.
pub fn decode_param<T: DeserializeOwned>(index: usize, raw: Option<&str>) -> Result<T> {
    serde_json::from_str(raw.unwrap_or(NULL)).map_err(|e| Error::ParameterDecode {
        index,
        message: e.to_string(),
    })
}

/// Encode a value as it travels inside an envelope
pub fn encode_value<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Serialization(e.to_string()))
}

/// Encode a method's return value for the `result` field
pub fn encode_result<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    encode_value(value)
}

/// Decode a `result` field back into a typed value
pub fn decode_result<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| Error::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct User {
        name: String,
        age: u32,
    }

    #[test]
    fn test_decode_request() {
        let req = decode_request(br#"{"id":7,"method":"addUser","params":["\"Alice\"","30"]}"#)
            .unwrap();
        assert_eq!(req.id, 7);
        assert_eq!(req.method, "addUser");
        assert_eq!(req.arity(), 2);
    }

    #[test]
    fn test_decode_invalid_json() {
        let result = decode_request(b"{not json");
        assert!(matches!(result, Err(Error::MalformedEnvelope(_))));
    }

    #[test]
    fn test_decode_empty_payload() {
        assert!(matches!(decode_request(b""), Err(Error::MalformedEnvelope(_))));
    }

    #[test]
    fn test_decode_wrong_shape() {
        // id must be an integer
        let result = decode_request(br#"{"id":"seven","params":[]}"#);
        assert!(matches!(result, Err(Error::MalformedEnvelope(_))));

        // params must hold strings
        let result = decode_request(br#"{"id":1,"params":[1,2]}"#);
        assert!(matches!(result, Err(Error::MalformedEnvelope(_))));
    }

    #[test]
    fn test_encode_response_error() {
        let text = encode_response(&RpcResponse::error(7, "Invalid parameters")).unwrap();
        assert_eq!(text, r#"{"id":7,"error":"Invalid parameters"}"#);
    }

    #[test]
    fn test_decode_param_struct() {
        let user: User = decode_param(0, Some(r#"{"name":"Bob","age":4}"#)).unwrap();
        assert_eq!(
            user,
            User {
                name: "Bob".into(),
                age: 4
            }
        );
    }

    #[test]
    fn test_decode_param_null() {
        let value: Option<u32> = decode_param(0, None).unwrap();
        assert_eq!(value, None);

        let err = decode_param::<u32>(3, None).unwrap_err();
        assert!(matches!(err, Error::ParameterDecode { index: 3, .. }));
    }

    #[test]
    fn test_decode_param_type_mismatch() {
        let err = decode_param::<u32>(1, Some("\"thirty\"")).unwrap_err();
        match err {
            Error::ParameterDecode { index, message } => {
                assert_eq!(index, 1);
                assert!(message.contains("invalid type"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_encode_result_string() {
        assert_eq!(encode_result("pong").unwrap(), "\"pong\"");
        assert_eq!(encode_result(&42u8).unwrap(), "42");
    }

    #[test]
    fn test_result_wire_text() {
        let result = encode_result("echo:A").unwrap();
        let text = encode_response(&RpcResponse::stream_item(result)).unwrap();
        assert_eq!(text, r#"{"id":0,"result":"\"echo:A\""}"#);
        let back = decode_response(&text).unwrap();
        assert_eq!(decode_result::<String>(back.result.as_deref().unwrap()).unwrap(), "echo:A");
    }
}
