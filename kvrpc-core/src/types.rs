//! Envelope types shared by the unary and duplex transports
//!
//! Both transports speak the same two JSON shapes:
//!
//! - **Request envelope**: `{"id": 7, "method": "...", "params": ["\"Alice\"", "30"]}`
//! - **Response envelope**: `{"id": 7, "result": "..."}` or `{"id": 7, "error": "..."}`
//!
//! Every entry in `params` is itself an encoded value (a JSON document in a
//! string), so the envelope never needs to know the parameter types. The
//! same applies to `result`: it carries the method's return value already
//! encoded as text.
//!
//! # Ids
//!
//! Ids are plain integers. Unary responses echo the request id; duplex
//! responses always carry `0` because the stream is not correlated to any
//! particular inbound frame.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Id used for every frame written by a duplex session
pub const STREAM_RESPONSE_ID: i64 = 0;

/// Number of positional parameters a bound method declares
pub type Arity = usize;

/// Largest arity the binder supports for unary methods
pub const MAX_ARITY: Arity = 5;

/// HTTP verbs a unary binding can be registered under
///
/// The duplex transport always upgrades from `GET`, so channel bindings are
/// registered under [`HttpVerb::Get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpVerb {
    Get,
    Post,
    Put,
    Delete,
    Options,
}

impl HttpVerb {
    /// All verbs the unary transport accepts
    pub const ALL: [HttpVerb; 5] = [
        HttpVerb::Get,
        HttpVerb::Post,
        HttpVerb::Put,
        HttpVerb::Delete,
        HttpVerb::Options,
    ];

    /// Canonical upper-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVerb::Get => "GET",
            HttpVerb::Post => "POST",
            HttpVerb::Put => "PUT",
            HttpVerb::Delete => "DELETE",
            HttpVerb::Options => "OPTIONS",
        }
    }

    /// Whether requests with this verb carry a JSON request envelope
    ///
    /// `GET` requests have no body; their id comes from the query string.
    pub fn has_body(&self) -> bool {
        !matches!(self, HttpVerb::Get)
    }
}

impl fmt::Display for HttpVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpVerb {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpVerb::Get),
            "POST" => Ok(HttpVerb::Post),
            "PUT" => Ok(HttpVerb::Put),
            "DELETE" => Ok(HttpVerb::Delete),
            "OPTIONS" => Ok(HttpVerb::Options),
            other => Err(crate::Error::UnsupportedVerb(other.to_string())),
        }
    }
}

/// Request envelope
///
/// `params` holds one encoded string per positional parameter. A `null`
/// entry stands for a parameter whose encoded form is JSON `null`, which is
/// how clients send an absent optional argument.
///
/// # Examples
///
/// ```rust
/// use kvrpc_core::RpcRequest;
///
/// let req = RpcRequest::new(7, "addUser", vec![Some("\"Alice\"".into()), Some("30".into())]);
/// assert_eq!(req.arity(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Correlation id, echoed by the unary response
    pub id: i64,
    /// Method name; carried for compatibility with existing clients, never
    /// used for routing
    #[serde(default)]
    pub method: String,
    /// Encoded positional parameters
    #[serde(default)]
    pub params: Vec<Option<String>>,
}

impl RpcRequest {
    pub fn new(id: i64, method: impl Into<String>, params: Vec<Option<String>>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    /// Request with no parameters, as synthesized for bodiless `GET` calls
    pub fn without_params(id: i64) -> Self {
        Self::new(id, "", Vec::new())
    }

    /// Number of parameters the caller supplied
    pub fn arity(&self) -> Arity {
        self.params.len()
    }
}

/// Response envelope
///
/// Exactly one of `result` and `error` is present; the constructors are the
/// only way the crate builds responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Id of the request this answers (`0` for duplex frames)
    pub id: i64,
    /// Encoded return value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Human-readable failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    /// Successful response carrying an already-encoded result
    pub fn success(id: i64, result: impl Into<String>) -> Self {
        Self {
            id,
            result: Some(result.into()),
            error: None,
        }
    }

    /// Failed response
    ///
    /// An empty message is replaced with the literal `"Error"` so the field
    /// always says something.
    pub fn error(id: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            "Error".to_string()
        } else {
            message
        };
        Self {
            id,
            result: None,
            error: Some(message),
        }
    }

    /// One outbound frame of a duplex session
    pub fn stream_item(result: impl Into<String>) -> Self {
        Self::success(STREAM_RESPONSE_ID, result)
    }

    pub fn is_success(&self) -> bool {
        self.result.is_some()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
