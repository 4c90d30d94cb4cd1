//! kvrpc - typed RPC binding over HTTP and WebSocket
//!
//! Convenience crate re-exporting the kvrpc sub-crates:
//!
//! - **kvrpc-core**: envelopes, codec, errors, observability
//! - **kvrpc-server**: service binders, unary dispatcher, duplex sessions
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use kvrpc::{CallContext, KvServer, ServiceManager};
//! use std::sync::Arc;
//!
//! struct Greeter;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut greeter = ServiceManager::new("Greeter", |_: &CallContext| Ok(Arc::new(Greeter)));
//!     greeter.bind1("hello", |_g: Arc<Greeter>, name: String| async move {
//!         Ok(format!("hello {name}"))
//!     });
//!
//!     let server = KvServer::builder()
//!         .bind_str("127.0.0.1:8080")?
//!         .service(greeter)
//!         .build()
//!         .await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! A client calls it with `POST /kv/hello` and the body
//! `{"id":1,"params":["\"Ann\""]}`, and receives
//! `{"id":1,"result":"\"hello Ann\""}`.

pub use kvrpc_core as core;
pub use kvrpc_server as server;

pub use kvrpc_core::{Error, HttpVerb, Result, RpcRequest, RpcResponse};
pub use kvrpc_server::{CallContext, KvServer, Route, ServerBuilder, ServiceManager, SessionRegistry};
