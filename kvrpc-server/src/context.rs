//! Per-call context handed to service factories
//!
//! Everything a service might want to know about the call it is serving
//! (which route, which verb, which session, which headers) travels in a
//! `CallContext` value. There is no ambient "current request" state: the
//! transport builds the context and passes it down explicitly.

use kvrpc_core::HttpVerb;
use std::collections::HashMap;
use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct CallContext {
    /// Verb the call arrived with (`GET` for duplex upgrades)
    pub verb: HttpVerb,
    /// Route id the call resolved to
    pub route_id: String,
    /// Envelope id of the current unary request (`0` for sessions)
    pub request_id: i64,
    /// Connection id assigned by the session router
    pub conn_id: Option<u64>,
    /// Key of the duplex session, when the call belongs to one
    pub session_key: Option<String>,
    /// Peer address, when the host server exposes it
    pub remote_addr: Option<SocketAddr>,
    /// Request headers with lower-cased names
    headers: HashMap<String, String>,
}

impl CallContext {
    /// Context for a unary call
    pub fn unary(verb: HttpVerb, route_id: impl Into<String>) -> Self {
        Self {
            verb,
            route_id: route_id.into(),
            request_id: 0,
            conn_id: None,
            session_key: None,
            remote_addr: None,
            headers: HashMap::new(),
        }
    }

    /// Context for a duplex connection before its session exists
    pub fn channel(conn_id: u64, route_id: impl Into<String>) -> Self {
        Self {
            conn_id: Some(conn_id),
            ..Self::unary(HttpVerb::Get, route_id)
        }
    }

    pub fn with_request_id(mut self, request_id: i64) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_session(mut self, session_key: impl Into<String>) -> Self {
        self.session_key = Some(session_key.into());
        self
    }

    pub fn with_remote_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.remote_addr = addr;
        self
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self = self.with_header(name, value);
        }
        self
    }

    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_session(&self) -> bool {
        self.session_key.is_some()
    }
}
