//! Typed service binders
//!
//! A [`ServiceManager`] collects the bindings of one service type. Each
//! `bindN` call takes an async closure with `N` typed parameters, wraps it
//! into a type-erased [`Handler`] that decodes the positional parameters,
//! calls the method on a fresh service instance and encodes the return
//! value, and records the resulting [`ServiceBinding`] under a route id.
//!
//! Route ids are either given explicitly through a [`Route`] or generated as
//! `"route" + service name + counter`, the counter being shared by all
//! bindings (unary and duplex) of the manager.
//!
//! ```rust
//! use kvrpc_server::{CallContext, Route, ServiceManager};
//! use std::sync::Arc;
//!
//! struct Users;
//!
//! impl Users {
//!     fn greet(&self, name: String) -> String {
//!         format!("hello {name}")
//!     }
//! }
//!
//! let mut manager = ServiceManager::new("Users", |_: &CallContext| Ok(Arc::new(Users)));
//! let id = manager.bind1(Route::auto(), |users: Arc<Users>, name: String| async move {
//!     Ok(users.greet(name))
//! });
//! assert_eq!(id, "routeUsers0");
//! ```

use crate::context::CallContext;
use crate::handler::{channel_from_fn, from_fn, ChannelHandler, Handler};
use crate::router::{CHANNEL_PREFIX, UNARY_PREFIX};
use futures::FutureExt;
use kvrpc_core::{
    codec, Arity, Error, Filter, HttpVerb, PagedResult, Result, RpcRequest, RpcResponse,
    SelectOption, Sorter,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Produces the service instance a call runs against
///
/// Called once per unary call and once per duplex session. Closures of the
/// shape `Fn(&CallContext) -> Result<Arc<S>>` implement it.
pub trait ServiceFactory<S>: Send + Sync + 'static {
    fn instance(&self, ctx: &CallContext) -> Result<Arc<S>>;
}

impl<S, F> ServiceFactory<S> for F
where
    F: Fn(&CallContext) -> Result<Arc<S>> + Send + Sync + 'static,
{
    fn instance(&self, ctx: &CallContext) -> Result<Arc<S>> {
        self(ctx)
    }
}

/// Route descriptor for a binding: verb plus optional explicit id
///
/// Defaults to `POST` with a generated id. The verb only matters for unary
/// bindings; duplex bindings are always reached through `GET` upgrades.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    verb: HttpVerb,
    id: Option<String>,
}

impl Default for Route {
    fn default() -> Self {
        Self {
            verb: HttpVerb::Post,
            id: None,
        }
    }
}

impl Route {
    /// `POST` with a generated id
    pub fn auto() -> Self {
        Self::default()
    }

    pub fn new(verb: HttpVerb, id: impl Into<String>) -> Self {
        Self {
            verb,
            id: Some(id.into()),
        }
    }

    pub fn post(id: impl Into<String>) -> Self {
        Self::new(HttpVerb::Post, id)
    }

    pub fn get(id: impl Into<String>) -> Self {
        Self::new(HttpVerb::Get, id)
    }

    pub fn with_verb(mut self, verb: HttpVerb) -> Self {
        self.verb = verb;
        self
    }

    pub fn verb(&self) -> HttpVerb {
        self.verb
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

impl From<&str> for Route {
    fn from(id: &str) -> Self {
        Route::post(id)
    }
}

impl From<String> for Route {
    fn from(id: String) -> Self {
        Route::post(id)
    }
}

impl From<HttpVerb> for Route {
    fn from(verb: HttpVerb) -> Self {
        Route::auto().with_verb(verb)
    }
}

/// A bound unary method: route id, verb, arity and handler
#[derive(Clone)]
pub struct ServiceBinding {
    route_id: String,
    verb: HttpVerb,
    arity: Arity,
    handler: Arc<dyn Handler>,
}

impl std::fmt::Debug for ServiceBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceBinding")
            .field("route_id", &self.route_id)
            .field("verb", &self.verb)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

impl ServiceBinding {
    pub fn new(
        route_id: impl Into<String>,
        verb: HttpVerb,
        arity: Arity,
        handler: Box<dyn Handler>,
    ) -> Self {
        Self {
            route_id: route_id.into(),
            verb,
            arity,
            handler: Arc::from(handler),
        }
    }

    pub fn route_id(&self) -> &str {
        &self.route_id
    }

    pub fn verb(&self) -> HttpVerb {
        self.verb
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }

    /// URL path the binding is served under
    pub fn path(&self) -> String {
        format!("{UNARY_PREFIX}{}", self.route_id)
    }

    /// Run the method, surfacing failures as `Err`
    ///
    /// The method is not invoked when the parameter count differs from the
    /// binding's arity.
    pub async fn invoke(&self, ctx: CallContext, params: Vec<Option<String>>) -> Result<String> {
        if params.len() != self.arity {
            return Err(Error::ArityMismatch {
                expected: self.arity,
                actual: params.len(),
            });
        }
        self.handler.handle(ctx, params).await
    }

    /// Answer one request envelope
    ///
    /// Always produces exactly one response carrying the request's id.
    /// Errors and panics raised by the method become error envelopes.
    pub async fn call(&self, ctx: CallContext, request: RpcRequest) -> RpcResponse {
        let id = request.id;
        let outcome = AssertUnwindSafe(self.invoke(ctx, request.params))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(Error::Internal(panic_message(panic.as_ref()))));

        match outcome {
            Ok(result) => RpcResponse::success(id, result),
            Err(Error::ArityMismatch { expected, actual }) => {
                tracing::warn!(
                    route = %self.route_id,
                    request_id = id,
                    expected,
                    actual,
                    "Rejected call with wrong parameter count"
                );
                RpcResponse::error(id, kvrpc_core::error::INVALID_PARAMETERS)
            }
            Err(e) => {
                tracing::error!(
                    route = %self.route_id,
                    request_id = id,
                    error = %e,
                    "Service call failed"
                );
                RpcResponse::error(id, e.reply_message())
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_default()
}

/// A bound duplex method
#[derive(Clone)]
pub struct ChannelBinding {
    route_id: String,
    handler: Arc<dyn ChannelHandler>,
}

impl std::fmt::Debug for ChannelBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelBinding")
            .field("route_id", &self.route_id)
            .finish_non_exhaustive()
    }
}

impl ChannelBinding {
    pub fn new(route_id: impl Into<String>, handler: Box<dyn ChannelHandler>) -> Self {
        Self {
            route_id: route_id.into(),
            handler: Arc::from(handler),
        }
    }

    pub fn route_id(&self) -> &str {
        &self.route_id
    }

    pub fn path(&self) -> String {
        format!("{CHANNEL_PREFIX}{}", self.route_id)
    }

    /// Drive the session until the method finishes
    pub async fn run(
        &self,
        ctx: CallContext,
        inbound: UnboundedReceiver<String>,
        outbound: UnboundedSender<String>,
    ) -> Result<()> {
        self.handler.open(ctx, inbound, outbound).await
    }
}

/// Collects the bindings of one service type
pub struct ServiceManager<S> {
    name: String,
    factory: Arc<dyn ServiceFactory<S>>,
    counter: usize,
    bindings: Vec<ServiceBinding>,
    channels: Vec<ChannelBinding>,
}

macro_rules! bind_arity {
    ($(#[$doc:meta])* $name:ident => $arity:literal; $($param:ident: $ty:ident @ $idx:literal),+) => {
        $(#[$doc])*
        pub fn $name<$($ty,)+ R, F, Fut>(&mut self, route: impl Into<Route>, method: F) -> String
        where
            $($ty: DeserializeOwned + Send + 'static,)+
            R: Serialize + Send + 'static,
            F: Fn(Arc<S>, $($ty),+) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<R>> + Send + 'static,
        {
            let factory = Arc::clone(&self.factory);
            let method = Arc::new(method);
            let handler = from_fn(move |ctx: CallContext, params: Vec<Option<String>>| {
                let factory = Arc::clone(&factory);
                let method = Arc::clone(&method);
                async move {
                    let mut params = params.into_iter();
                    $(
                        let $param: $ty = codec::decode_param($idx, params.next().flatten().as_deref())?;
                    )+
                    let service = factory.instance(&ctx)?;
                    let value = method(service, $($param),+).await?;
                    codec::encode_result(&value)
                }
            });
            self.push(route.into(), $arity, handler)
        }
    };
}

impl<S: Send + Sync + 'static> ServiceManager<S> {
    /// Manager whose instances come from `factory`
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&CallContext) -> Result<Arc<S>> + Send + Sync + 'static,
    {
        Self::from_factory(name, factory)
    }

    /// Manager backed by any [`ServiceFactory`] implementation
    pub fn from_factory(name: impl Into<String>, factory: impl ServiceFactory<S>) -> Self {
        Self {
            name: name.into(),
            factory: Arc::new(factory),
            counter: 0,
            bindings: Vec::new(),
            channels: Vec::new(),
        }
    }

    /// Manager sharing one instance across every call
    pub fn shared(name: impl Into<String>, service: S) -> Self {
        let service = Arc::new(service);
        Self::new(name, move |_: &CallContext| Ok(Arc::clone(&service)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bindings(&self) -> &[ServiceBinding] {
        &self.bindings
    }

    pub fn channels(&self) -> &[ChannelBinding] {
        &self.channels
    }

    pub fn into_parts(self) -> (Vec<ServiceBinding>, Vec<ChannelBinding>) {
        (self.bindings, self.channels)
    }

    fn route_id(&mut self, route: &Route) -> String {
        match route.id() {
            Some(id) => id.trim_matches('/').to_string(),
            None => {
                let id = format!("route{}{}", self.name, self.counter);
                self.counter += 1;
                id
            }
        }
    }

    fn push(&mut self, route: Route, arity: Arity, handler: Box<dyn Handler>) -> String {
        let route_id = self.route_id(&route);
        tracing::debug!(service = %self.name, route = %route_id, verb = %route.verb(), arity, "Bound method");
        self.bindings
            .push(ServiceBinding::new(route_id.clone(), route.verb(), arity, handler));
        route_id
    }

    /// Bind a method taking no parameters
    pub fn bind0<R, F, Fut>(&mut self, route: impl Into<Route>, method: F) -> String
    where
        R: Serialize + Send + 'static,
        F: Fn(Arc<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let factory = Arc::clone(&self.factory);
        let method = Arc::new(method);
        let handler = from_fn(move |ctx: CallContext, _params: Vec<Option<String>>| {
            let factory = Arc::clone(&factory);
            let method = Arc::clone(&method);
            async move {
                let service = factory.instance(&ctx)?;
                let value = method(service).await?;
                codec::encode_result(&value)
            }
        });
        self.push(route.into(), 0, handler)
    }

    bind_arity!(
        /// Bind a method taking one parameter
        bind1 => 1; a: A @ 0
    );
    bind_arity!(
        /// Bind a method taking two parameters
        bind2 => 2; a: A @ 0, b: B @ 1
    );
    bind_arity!(
        /// Bind a method taking three parameters
        bind3 => 3; a: A @ 0, b: B @ 1, c: C @ 2
    );
    bind_arity!(
        /// Bind a method taking four parameters
        bind4 => 4; a: A @ 0, b: B @ 1, c: C @ 2, d: D @ 3
    );
    bind_arity!(
        /// Bind a method taking five parameters
        bind5 => 5; a: A @ 0, b: B @ 1, c: C @ 2, d: D @ 3, e: E @ 4
    );

    /// Bind a duplex method
    ///
    /// The method receives typed request and response channels. Inbound
    /// values that fail to decode are logged and skipped. The session ends
    /// when the method returns, even if clones of the response sender are
    /// still alive; values queued by then are still delivered. The request
    /// channel closes when the client stops sending.
    pub fn bind_channel<P, Q, F, Fut>(&mut self, route: impl Into<Route>, method: F) -> String
    where
        P: DeserializeOwned + Send + 'static,
        Q: Serialize + Send + 'static,
        F: Fn(Arc<S>, UnboundedReceiver<P>, UnboundedSender<Q>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let factory = Arc::clone(&self.factory);
        let method = Arc::new(method);
        let handler = channel_from_fn(
            move |ctx: CallContext,
                  mut raw_in: UnboundedReceiver<String>,
                  raw_out: UnboundedSender<String>| {
                let factory = Arc::clone(&factory);
                let method = Arc::clone(&method);
                async move {
                    let service = factory.instance(&ctx)?;
                    let (req_tx, req_rx) = mpsc::unbounded_channel::<P>();
                    let (resp_tx, mut resp_rx) = mpsc::unbounded_channel::<Q>();
                    let mut req_tx = Some(req_tx);
                    let mut responses_open = true;

                    let forward_out = |value: Q| match codec::encode_value(&value) {
                        Ok(text) => {
                            let _ = raw_out.send(text);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Dropping stream value that failed to encode")
                        }
                    };

                    let call = method(service, req_rx, resp_tx);
                    tokio::pin!(call);
                    let result = loop {
                        tokio::select! {
                            result = &mut call => break result,
                            value = resp_rx.recv(), if responses_open => match value {
                                Some(value) => forward_out(value),
                                None => responses_open = false,
                            },
                            text = raw_in.recv(), if req_tx.is_some() => match text {
                                Some(text) => match codec::decode_param::<P>(0, Some(text.as_str())) {
                                    Ok(value) => {
                                        if let Some(tx) = &req_tx {
                                            let _ = tx.send(value);
                                        }
                                    }
                                    Err(e) => {
                                        tracing::warn!(error = %e, "Dropping stream value that failed to decode")
                                    }
                                },
                                // client stopped sending
                                None => req_tx = None,
                            },
                        }
                    };

                    // senders cloned by the method may outlive it
                    resp_rx.close();
                    while let Ok(value) = resp_rx.try_recv() {
                        forward_out(value);
                    }
                    result
                }
            },
        );

        let route_id = self.route_id(&route.into());
        tracing::debug!(service = %self.name, route = %route_id, "Bound channel");
        self.channels
            .push(ChannelBinding::new(route_id.clone(), handler));
        route_id
    }

    /// Bind a select-options lookup: `(search, initial)` to options
    pub fn bind_options<F, Fut>(&mut self, route: impl Into<Route>, method: F) -> String
    where
        F: Fn(Arc<S>, Option<String>, Option<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<SelectOption>>> + Send + 'static,
    {
        self.bind2(route, method)
    }

    /// Bind a paged table query: `(page, size, filters, sorters)` to a page
    pub fn bind_paged<T, F, Fut>(&mut self, route: impl Into<Route>, method: F) -> String
    where
        T: Serialize + Send + 'static,
        F: Fn(Arc<S>, Option<u32>, Option<u32>, Option<Vec<Filter>>, Option<Vec<Sorter>>) -> Fut
            + Send
            + Sync
            + 'static,
        Fut: Future<Output = Result<PagedResult<T>>> + Send + 'static,
    {
        self.bind4(route, method)
    }
}
