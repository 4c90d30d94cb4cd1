//! OpenTelemetry instruments for the dispatcher and the session router
//!
//! All instruments are named `kvrpc.server.*`:
//!
//! - **requests.total** / **request.duration**: unary calls by route and
//!   outcome (`success`, `error`)
//! - **requests.in_flight**: unary calls currently running
//! - **requests.rejected**: calls refused by admission control or routing,
//!   by reason (`not_found`, `malformed`, `overloaded`)
//! - **sessions.active** / **sessions.total**: duplex sessions
//! - **errors.total**: failures by kind
//!
//! Metrics are recorded only when the server was built with observability
//! enabled. Without an installed meter provider the instruments are no-ops.
//!
//! ```rust,no_run
//! use kvrpc_server::ServerMetrics;
//!
//! let metrics = ServerMetrics::new("user-service");
//! metrics.record_request("addUser", "success", 0.004);
//! metrics.record_session_opened(1);
//! ```

use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter, UpDownCounter},
    InstrumentationScope, KeyValue,
};

pub struct ServerMetrics {
    /// Unary calls answered
    pub requests_total: Counter<u64>,
    /// Unary call duration in seconds
    pub request_duration: Histogram<f64>,
    /// Unary calls holding an admission slot
    pub requests_in_flight: UpDownCounter<i64>,
    /// Calls refused before reaching a binding
    pub requests_rejected: Counter<u64>,
    /// Currently open duplex sessions
    pub sessions_active: Gauge<i64>,
    /// Duplex sessions opened since startup
    pub sessions_total: Counter<u64>,
    pub errors_total: Counter<u64>,
}

impl ServerMetrics {
    /// Instruments on the global meter provider, scoped to `service_name`
    pub fn new(service_name: impl Into<String>) -> Self {
        let scope = InstrumentationScope::builder(service_name.into())
            .with_version(env!("CARGO_PKG_VERSION"))
            .build();
        Self::new_with_meter(&global::meter_with_scope(scope))
    }

    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            requests_total: meter
                .u64_counter("kvrpc.server.requests.total")
                .with_description("Unary calls answered")
                .build(),
            request_duration: meter
                .f64_histogram("kvrpc.server.request.duration")
                .with_description("Unary call duration in seconds")
                .with_unit("s")
                .build(),
            requests_in_flight: meter
                .i64_up_down_counter("kvrpc.server.requests.in_flight")
                .with_description("Unary calls currently running")
                .build(),
            requests_rejected: meter
                .u64_counter("kvrpc.server.requests.rejected")
                .with_description("Calls refused before reaching a binding")
                .build(),
            sessions_active: meter
                .i64_gauge("kvrpc.server.sessions.active")
                .with_description("Open duplex sessions")
                .build(),
            sessions_total: meter
                .u64_counter("kvrpc.server.sessions.total")
                .with_description("Duplex sessions opened")
                .build(),
            errors_total: meter
                .u64_counter("kvrpc.server.errors.total")
                .with_description("Failures by kind")
                .build(),
        }
    }

    pub fn record_request(&self, route: &str, status: &str, duration_secs: f64) {
        let attributes = &[
            KeyValue::new("route", route.to_string()),
            KeyValue::new("status", status.to_string()),
        ];
        self.requests_total.add(1, attributes);
        self.request_duration.record(duration_secs, attributes);
    }

    pub fn record_admitted(&self) {
        self.requests_in_flight.add(1, &[]);
    }

    pub fn record_finished(&self) {
        self.requests_in_flight.add(-1, &[]);
    }

    pub fn record_rejected(&self, reason: &'static str) {
        self.requests_rejected
            .add(1, &[KeyValue::new("reason", reason)]);
    }

    pub fn record_session_opened(&self, active: i64) {
        self.sessions_active.record(active, &[]);
        self.sessions_total.add(1, &[]);
    }

    pub fn record_session_closed(&self, active: i64) {
        self.sessions_active.record(active, &[]);
    }

    pub fn record_error(&self, kind: &str) {
        self.errors_total
            .add(1, &[KeyValue::new("kind", kind.to_string())]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = ServerMetrics::new("test-server");

        metrics.record_request("ping", "success", 0.001);
        metrics.record_rejected("overloaded");
        metrics.record_admitted();
        metrics.record_finished();
        metrics.record_session_opened(1);
        metrics.record_session_closed(0);
        metrics.record_error("panic");
    }

    #[test]
    fn test_request_metrics() {
        let metrics = ServerMetrics::new_with_meter(&global::meter("kvrpc-test"));

        metrics.record_request("addUser", "success", 0.05);
        metrics.record_request("addUser", "error", 0.01);
        metrics.record_rejected("not_found");
        metrics.record_rejected("malformed");
    }
}
