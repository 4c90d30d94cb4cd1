//! Unary request dispatcher
//!
//! Resolves a `(verb, route id)` pair, decodes the envelope (or synthesizes
//! one for body-less `GET` requests), applies admission control, and runs
//! the binding on its own task. Requests are independent of each other: the
//! dispatcher holds no per-request state and any number of calls may run
//! at once, up to the in-flight limit.

use crate::context::CallContext;
use crate::metrics::ServerMetrics;
use crate::router::Router;
use kvrpc_core::error::GENERIC_ERROR;
use kvrpc_core::{codec, Error, HttpVerb, RpcRequest, RpcResponse};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default cap on concurrently running unary calls
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1024;

/// Admission control settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Calls allowed to run at once
    pub max_in_flight: usize,
    /// How long a call may wait for a slot before it is refused.
    /// `None` waits indefinitely.
    pub admission_timeout: Option<Duration>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            admission_timeout: None,
        }
    }
}

/// What the transport should answer
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Send the envelope with status 200
    Reply(RpcResponse),
    /// No binding for this verb and route (404)
    NotFound,
    /// The body was not a valid envelope (400)
    Malformed(Error),
    /// No admission slot became free in time (503)
    Overloaded,
}

#[derive(Clone)]
pub struct Dispatcher {
    router: Router,
    permits: Arc<Semaphore>,
    config: DispatchConfig,
    metrics: Option<Arc<ServerMetrics>>,
}

impl Dispatcher {
    pub fn new(router: Router, config: DispatchConfig) -> Self {
        Self {
            router,
            permits: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<ServerMetrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn config(&self) -> DispatchConfig {
        self.config
    }

    /// Admission slots currently free
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Serve one unary call
    ///
    /// `query_id` is the `id` query parameter, used as the request id when
    /// the verb carries no body.
    #[tracing::instrument(skip(self, body, ctx), fields(verb = %verb, route = %route_id))]
    pub async fn dispatch(
        &self,
        verb: HttpVerb,
        route_id: &str,
        query_id: Option<i64>,
        body: &[u8],
        ctx: CallContext,
    ) -> DispatchOutcome {
        let started = Instant::now();

        let Some(binding) = self.router.resolve_unary(verb, route_id) else {
            tracing::debug!("No binding for route");
            self.record_rejected("not_found");
            return DispatchOutcome::NotFound;
        };

        let request = if verb.has_body() {
            match codec::decode_request(body) {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(error = %e, "Rejected malformed envelope");
                    self.record_rejected("malformed");
                    return DispatchOutcome::Malformed(e);
                }
            }
        } else {
            RpcRequest::without_params(query_id.unwrap_or(0))
        };

        let Some(permit) = self.admit().await else {
            tracing::warn!(
                max_in_flight = self.config.max_in_flight,
                "Rejected call, no admission slot"
            );
            self.record_rejected("overloaded");
            return DispatchOutcome::Overloaded;
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_admitted();
        }
        let id = request.id;
        let ctx = ctx.with_request_id(id);
        let task = tokio::spawn(async move {
            let _permit = permit;
            binding.call(ctx, request).await
        });

        let response = match task.await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(request_id = id, error = %e, "Call task did not complete");
                if let Some(metrics) = &self.metrics {
                    metrics.record_error("task");
                }
                RpcResponse::error(id, GENERIC_ERROR)
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_finished();
            let status = if response.is_success() { "success" } else { "error" };
            metrics.record_request(route_id, status, started.elapsed().as_secs_f64());
        }
        tracing::debug!(
            request_id = id,
            success = response.is_success(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Call completed"
        );

        DispatchOutcome::Reply(response)
    }

    async fn admit(&self) -> Option<OwnedSemaphorePermit> {
        let acquire = Arc::clone(&self.permits).acquire_owned();
        match self.config.admission_timeout {
            Some(limit) => tokio::time::timeout(limit, acquire).await.ok()?.ok(),
            None => acquire.await.ok(),
        }
    }

    fn record_rejected(&self, reason: &'static str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_rejected(reason);
        }
    }
}
