//! Fluent builder for [`KvServer`]
//!
//! ```rust,no_run
//! use kvrpc_server::{CallContext, ServerBuilder, ServiceManager};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Health;
//!
//! #[tokio::main]
//! async fn main() -> kvrpc_core::Result<()> {
//!     let mut health = ServiceManager::new("Health", |_: &CallContext| Ok(Arc::new(Health)));
//!     health.bind0("ping", |_h: Arc<Health>| async move { Ok("pong") });
//!
//!     let server = ServerBuilder::new()
//!         .bind_str("127.0.0.1:8080")?
//!         .service(health)
//!         .max_in_flight(256)
//!         .admission_timeout(Duration::from_secs(2))
//!         .build()
//!         .await?;
//!
//!     server.run().await
//! }
//! ```

use crate::connection::ChannelService;
use crate::dispatcher::{DispatchConfig, Dispatcher};
use crate::metrics::ServerMetrics;
use crate::router::Router;
use crate::session::SessionRegistry;
use crate::{KvServer, ServiceManager};
use kvrpc_core::{Error, ObservabilityConfig, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub struct ServerBuilder {
    addr: Option<SocketAddr>,
    router: Router,
    dispatch: DispatchConfig,
    sessions: Option<SessionRegistry>,
    observability_config: Option<ObservabilityConfig>,
    service_name: Option<String>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            addr: None,
            router: Router::new(),
            dispatch: DispatchConfig::default(),
            sessions: None,
            observability_config: None,
            service_name: None,
        }
    }

    pub fn bind(mut self, addr: impl Into<SocketAddr>) -> Self {
        self.addr = Some(addr.into());
        self
    }

    pub fn bind_str(mut self, addr: &str) -> Result<Self> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| Error::Config(format!("Invalid address {addr}: {e}")))?;
        self.addr = Some(addr);
        Ok(self)
    }

    /// Register every binding of a service
    pub fn service<S: Send + Sync + 'static>(mut self, manager: ServiceManager<S>) -> Self {
        self.router.mount(manager);
        self
    }

    /// Replace the routes with a prepared router
    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Share a session registry the application already holds
    pub fn sessions(mut self, sessions: SessionRegistry) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn max_in_flight(mut self, limit: usize) -> Self {
        self.dispatch.max_in_flight = limit;
        self
    }

    pub fn admission_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch.admission_timeout = Some(timeout);
        self
    }

    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self
    }

    pub fn with_default_observability(mut self) -> Self {
        self.observability_config = Some(ObservabilityConfig::default());
        self
    }

    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    pub async fn build(self) -> Result<KvServer> {
        let addr = self
            .addr
            .ok_or_else(|| Error::Config("No bind address specified".to_string()))?;

        let listener = TcpListener::bind(addr).await?;

        let metrics = match self.observability_config {
            Some(mut config) => {
                if let Some(name) = self.service_name {
                    config.service_name = name;
                }
                kvrpc_core::init_observability(config.clone()).map_err(|e| {
                    Error::Config(format!("Failed to initialize observability: {e}"))
                })?;
                Some(Arc::new(ServerMetrics::new(config.service_name)))
            }
            None => None,
        };

        if self.router.is_empty() {
            tracing::warn!("Server built without any bindings");
        }
        tracing::info!(
            addr = %addr,
            unary_routes = self.router.unary_routes().len(),
            channel_routes = self.router.channel_routes().len(),
            max_in_flight = self.dispatch.max_in_flight,
            "Server listening"
        );

        let sessions = self.sessions.unwrap_or_default();
        let dispatcher =
            Dispatcher::new(self.router.clone(), self.dispatch).with_metrics(metrics.clone());
        let channels = ChannelService::new(self.router, sessions.clone())
            .with_metrics(metrics.clone());

        Ok(KvServer {
            listener,
            dispatcher,
            channels,
            sessions,
            metrics,
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_str_rejects_garbage() {
        let err = ServerBuilder::new().bind_str("not an address").err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_build_without_address() {
        let err = ServerBuilder::new().build().await.err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_build_ephemeral_port() {
        let server = ServerBuilder::new()
            .bind_str("127.0.0.1:0")
            .unwrap()
            .max_in_flight(8)
            .build()
            .await
            .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert_eq!(server.dispatcher().available_permits(), 8);
    }
}
