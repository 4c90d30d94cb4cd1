//! Route tables
//!
//! Unary bindings are keyed by `(verb, path)`, duplex bindings by path alone
//! (they are always reached through a `GET` upgrade, so they are stored
//! under `GET`). Paths are normalized before insertion and lookup: a leading
//! slash is added and trailing slashes are dropped.
//!
//! Registration happens while the server is being wired. The first binding
//! registered for a key wins; later ones are logged and ignored. Once the
//! server is built the tables are shared read-only behind an `Arc`, so the
//! router is cheap to clone into every request task.
//!
//! # Examples
//!
//! ```rust
//! use kvrpc_server::{CallContext, Router, ServiceManager};
//! use kvrpc_core::HttpVerb;
//! use std::sync::Arc;
//!
//! struct Health;
//!
//! let mut manager = ServiceManager::new("Health", |_: &CallContext| Ok(Arc::new(Health)));
//! manager.bind0("ping", |_h: Arc<Health>| async move { Ok("pong") });
//!
//! let mut router = Router::new();
//! router.mount(manager);
//! assert!(router.resolve_unary(HttpVerb::Post, "ping").is_some());
//! assert!(router.resolve_unary(HttpVerb::Get, "ping").is_none());
//! ```

use crate::binder::{ChannelBinding, ServiceBinding, ServiceManager};
use kvrpc_core::HttpVerb;
use std::collections::HashMap;
use std::sync::Arc;

/// Path prefix of unary routes
pub const UNARY_PREFIX: &str = "/kv/";

/// Path prefix of duplex routes
pub const CHANNEL_PREFIX: &str = "/kvws/";

/// Normalize a route path: leading slash, no trailing slash
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Route id carried by a path: its last non-empty segment
pub fn route_id_from_path(path: &str) -> Option<&str> {
    path.rsplit('/').find(|segment| !segment.is_empty())
}

/// Lookup table from `(verb, path)` to a binding
#[derive(Debug)]
pub struct RouteTable<B> {
    routes: Arc<HashMap<(HttpVerb, String), Arc<B>>>,
}

impl<B> Clone for RouteTable<B> {
    fn clone(&self) -> Self {
        Self {
            routes: Arc::clone(&self.routes),
        }
    }
}

impl<B> Default for RouteTable<B> {
    fn default() -> Self {
        Self {
            routes: Arc::new(HashMap::new()),
        }
    }
}

impl<B> RouteTable<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a binding; returns `false` when the key was already taken
    pub fn register(&mut self, verb: HttpVerb, path: &str, binding: B) -> bool {
        let key = (verb, normalize_path(path));
        let routes = Arc::make_mut(&mut self.routes);
        if routes.contains_key(&key) {
            tracing::warn!(verb = %key.0, path = %key.1, "Route already bound, keeping the first binding");
            return false;
        }
        routes.insert(key, Arc::new(binding));
        true
    }

    pub fn resolve(&self, verb: HttpVerb, path: &str) -> Option<Arc<B>> {
        self.routes.get(&(verb, normalize_path(path))).cloned()
    }

    pub fn contains(&self, verb: HttpVerb, path: &str) -> bool {
        self.routes.contains_key(&(verb, normalize_path(path)))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Registered `(verb, path)` pairs, sorted
    pub fn paths(&self) -> Vec<(HttpVerb, String)> {
        let mut paths: Vec<_> = self.routes.keys().cloned().collect();
        paths.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.as_str().cmp(b.0.as_str())));
        paths
    }
}

/// Unary and duplex route tables of one server
#[derive(Debug, Clone, Default)]
pub struct Router {
    unary: RouteTable<ServiceBinding>,
    channels: RouteTable<ChannelBinding>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every binding collected by a service manager
    pub fn mount<S: Send + Sync + 'static>(&mut self, manager: ServiceManager<S>) {
        let (bindings, channels) = manager.into_parts();
        for binding in bindings {
            self.register(binding);
        }
        for channel in channels {
            self.register_channel(channel);
        }
    }

    pub fn register(&mut self, binding: ServiceBinding) -> bool {
        let path = binding.path();
        self.unary.register(binding.verb(), &path, binding)
    }

    pub fn register_channel(&mut self, binding: ChannelBinding) -> bool {
        let path = binding.path();
        self.channels.register(HttpVerb::Get, &path, binding)
    }

    pub fn resolve_unary(&self, verb: HttpVerb, route_id: &str) -> Option<Arc<ServiceBinding>> {
        self.unary
            .resolve(verb, &format!("{UNARY_PREFIX}{route_id}"))
    }

    pub fn resolve_channel(&self, route_id: &str) -> Option<Arc<ChannelBinding>> {
        self.channels
            .resolve(HttpVerb::Get, &format!("{CHANNEL_PREFIX}{route_id}"))
    }

    pub fn unary_routes(&self) -> &RouteTable<ServiceBinding> {
        &self.unary
    }

    pub fn channel_routes(&self) -> &RouteTable<ChannelBinding> {
        &self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.unary.is_empty() && self.channels.is_empty()
    }
}

/// Builder for a router assembled from several services
#[derive(Default)]
pub struct RouterBuilder {
    router: Router,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service<S: Send + Sync + 'static>(mut self, manager: ServiceManager<S>) -> Self {
        self.router.mount(manager);
        self
    }

    pub fn build(self) -> Router {
        self.router
    }
}
