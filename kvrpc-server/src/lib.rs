//! Typed RPC server over HTTP and WebSocket
//!
//! Application services are plain Rust types. Their async methods are bound
//! to routes through a [`ServiceManager`], which takes care of decoding the
//! positional parameters, calling the method on an instance produced by the
//! service factory, and encoding the result. Two transports serve the
//! bindings:
//!
//! - **Unary** (`/kv/{route}`): one HTTP request carries one envelope
//!   `{"id", "params"}` and receives one envelope `{"id", "result"|"error"}`.
//! - **Duplex** (`/kvws/{route}`): a WebSocket session where every text
//!   frame carries one value for the service and every value the service
//!   emits comes back as a stream envelope with id `0`.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use kvrpc_server::{CallContext, KvServer, Route, ServiceManager};
//! use std::sync::Arc;
//! use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
//!
//! struct Chat;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut chat = ServiceManager::new("Chat", |_: &CallContext| Ok(Arc::new(Chat)));
//!     chat.bind2("add", |_c: Arc<Chat>, a: i64, b: i64| async move { Ok(a + b) });
//!     chat.bind_channel(
//!         "echo",
//!         |_c: Arc<Chat>, mut rx: UnboundedReceiver<String>, tx: UnboundedSender<String>| async move {
//!             while let Some(text) = rx.recv().await {
//!                 let _ = tx.send(format!("echo:{text}"));
//!             }
//!             Ok(())
//!         },
//!     );
//!
//!     let server = KvServer::builder()
//!         .bind_str("127.0.0.1:8080")?
//!         .service(chat)
//!         .build()
//!         .await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Accept loop**: warp/hyper accept connections from the bound listener
//! - **Unary calls**: each request runs on its own task, bounded by an
//!   admission semaphore
//! - **Sessions**: each upgraded socket runs a send task, a receive task
//!   and the handler task, tracked in the [`SessionRegistry`]
//!
//! Route tables are filled while the server is built and are read-only
//! afterwards.

mod binder;
mod builder;
mod connection;
mod context;
mod dispatcher;
mod handler;
mod metrics;
mod router;
mod session;
pub mod transport;

pub use binder::{ChannelBinding, Route, ServiceBinding, ServiceFactory, ServiceManager};
pub use builder::ServerBuilder;
pub use connection::{ChannelService, CLOSE_ROUTE_NOT_FOUND};
pub use context::CallContext;
pub use dispatcher::{DispatchConfig, DispatchOutcome, Dispatcher, DEFAULT_MAX_IN_FLIGHT};
pub use handler::{
    channel_from_fn, from_fn, ChannelHandler, ChannelResult, Handler, HandlerResult,
};
pub use metrics::ServerMetrics;
pub use router::{
    normalize_path, route_id_from_path, RouteTable, Router, RouterBuilder, CHANNEL_PREFIX,
    UNARY_PREFIX,
};
pub use session::{session_key, SessionHandle, SessionInfo, SessionRegistry, SESSION_KEY_SEPARATOR};

use kvrpc_core::Result;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use warp::filters::BoxedFilter;
use warp::reply::Response;
use warp::Filter;

/// A bound server, ready to run
pub struct KvServer {
    pub(crate) listener: TcpListener,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) channels: ChannelService,
    pub(crate) sessions: SessionRegistry,
    pub(crate) metrics: Option<Arc<ServerMetrics>>,
}

impl KvServer {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Registry of the server's live duplex sessions
    pub fn sessions(&self) -> SessionRegistry {
        self.sessions.clone()
    }

    pub fn metrics(&self) -> Option<Arc<ServerMetrics>> {
        self.metrics.clone()
    }

    /// The `/kv` and `/kvws` filters, for mounting into another warp app
    pub fn routes(&self) -> BoxedFilter<(Response,)> {
        transport::routes(self.dispatcher.clone(), self.channels.clone()).boxed()
    }

    /// Serve until the process ends
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves, then close every open session
    #[tracing::instrument(skip(self, shutdown), name = "server.run")]
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tracing::info!("Starting kvrpc server");
        let routes = self.routes();

        let incoming = Box::pin(futures::stream::unfold(self.listener, |listener| async move {
            let accepted = listener.accept().await.map(|(stream, addr)| {
                tracing::debug!(addr = %addr, "Connection accepted");
                stream
            });
            Some((accepted, listener))
        }));

        tokio::select! {
            _ = warp::serve(routes).run_incoming(incoming) => {
                tracing::warn!("Accept loop ended");
            }
            _ = shutdown => {
                tracing::info!("Shutdown requested");
            }
        }

        let open = self.sessions.len().await;
        self.sessions.close_all().await;
        tracing::info!(open_sessions = open, "Server stopped");
        Ok(())
    }
}
