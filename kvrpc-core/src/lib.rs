//! Envelope types, codec and error handling for kvrpc
//!
//! This crate holds everything the unary and duplex transports share:
//!
//! - **Types**: the request/response envelopes and HTTP verbs
//! - **Codec**: envelope encoding plus the serde-based value serializer
//! - **Errors**: the transport/application error taxonomy
//! - **Remote**: option/page types for data-grid consumers
//! - **Observability**: `tracing` subscriber and OpenTelemetry setup
//!
//! The crate does no I/O. `kvrpc-server` builds the binder, the dispatcher
//! and the session router on top of it.
//!
//! # Example
//!
//! ```rust
//! use kvrpc_core::{codec, RpcResponse};
//!
//! let request = codec::decode_request(br#"{"id":3,"params":[]}"#).unwrap();
//! let result = codec::encode_result("pong").unwrap();
//! let wire = codec::encode_response(&RpcResponse::success(request.id, result)).unwrap();
//! assert_eq!(wire, r#"{"id":3,"result":"\"pong\""}"#);
//! ```

pub mod codec;
pub mod error;
pub mod observability;
pub mod remote;
pub mod types;

pub use error::{Error, Result};
pub use observability::{init_observability, shutdown_observability, ObservabilityConfig};
pub use remote::{Filter, PagedResult, SelectOption, SortDirection, Sorter};
pub use types::{Arity, HttpVerb, RpcRequest, RpcResponse, MAX_ARITY, STREAM_RESPONSE_ID};
