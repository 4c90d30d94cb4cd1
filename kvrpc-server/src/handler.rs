//! Type-erased handler traits
//!
//! Bound service methods are stored behind two object-safe traits so the
//! route tables can hold methods of any signature:
//!
//! - [`Handler`] answers one unary call. It receives the envelope's
//!   positional parameters (still encoded) and produces the encoded result.
//! - [`ChannelHandler`] drives one duplex session. It receives a channel of
//!   encoded inbound values and a sender for encoded outbound values.
//!
//! The typed binders on [`crate::ServiceManager`] build these from ordinary async
//! closures, decoding parameters and encoding results on the way. `from_fn`
//! and `channel_from_fn` are the raw entry points for callers that want to
//! work with the encoded strings themselves.
//!
//! # Examples
//!
//! ```rust
//! use kvrpc_server::from_fn;
//!
//! let handler = from_fn(|_ctx, params| async move {
//!     Ok(format!("{}", params.len()))
//! });
//! ```

use crate::context::CallContext;
use kvrpc_core::Result;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Future returned by a unary handler: the encoded result text
pub type HandlerResult = Pin<Box<dyn Future<Output = Result<String>> + Send>>;

/// Future returned by a channel handler, resolved when the session's work
/// is done
pub type ChannelResult = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// One unary service method
///
/// The parameter vector has already been checked against the binding's
/// arity when `handle` is called.
pub trait Handler: Send + Sync {
    fn handle(&self, ctx: CallContext, params: Vec<Option<String>>) -> HandlerResult;
}

/// One duplex service method
///
/// `inbound` yields each value the client sends, encoded. Values written
/// to `outbound` are wrapped into stream envelopes and sent to the client.
/// Dropping `outbound` (or returning) ends the session.
pub trait ChannelHandler: Send + Sync {
    fn open(
        &self,
        ctx: CallContext,
        inbound: UnboundedReceiver<String>,
        outbound: UnboundedSender<String>,
    ) -> ChannelResult;
}

/// Adapts an async closure into a [`Handler`]
pub struct AsyncHandler<F> {
    func: F,
}

impl<F, Fut> Handler for AsyncHandler<F>
where
    F: Fn(CallContext, Vec<Option<String>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    fn handle(&self, ctx: CallContext, params: Vec<Option<String>>) -> HandlerResult {
        Box::pin((self.func)(ctx, params))
    }
}

/// Adapts an async closure into a [`ChannelHandler`]
pub struct AsyncChannelHandler<F> {
    func: F,
}

impl<F, Fut> ChannelHandler for AsyncChannelHandler<F>
where
    F: Fn(CallContext, UnboundedReceiver<String>, UnboundedSender<String>) -> Fut
        + Send
        + Sync
        + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn open(
        &self,
        ctx: CallContext,
        inbound: UnboundedReceiver<String>,
        outbound: UnboundedSender<String>,
    ) -> ChannelResult {
        Box::pin((self.func)(ctx, inbound, outbound))
    }
}

/// Create a unary handler working on encoded parameters and results
pub fn from_fn<F, Fut>(func: F) -> Box<dyn Handler>
where
    F: Fn(CallContext, Vec<Option<String>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    Box::new(AsyncHandler { func })
}

/// Create a channel handler working on encoded values
pub fn channel_from_fn<F, Fut>(func: F) -> Box<dyn ChannelHandler>
where
    F: Fn(CallContext, UnboundedReceiver<String>, UnboundedSender<String>) -> Fut
        + Send
        + Sync
        + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Box::new(AsyncChannelHandler { func })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvrpc_core::{Error, HttpVerb};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_unary_handler() {
        let handler = from_fn(|ctx, params| async move {
            Ok(format!("{}:{}", ctx.route_id, params.len()))
        });

        let ctx = CallContext::unary(HttpVerb::Post, "count");
        let result = handler
            .handle(ctx, vec![Some("1".into()), None])
            .await
            .unwrap();
        assert_eq!(result, "count:2");
    }

    #[tokio::test]
    async fn test_unary_handler_error() {
        let handler = from_fn(|_ctx, _params| async move { Err(Error::service("boom")) });
        let err = handler
            .handle(CallContext::unary(HttpVerb::Post, "fail"), Vec::new())
            .await
            .unwrap_err();
        assert_eq!(err.reply_message(), "boom");
    }

    #[tokio::test]
    async fn test_channel_handler_echo() {
        let handler = channel_from_fn(|_ctx, mut inbound, outbound| async move {
            while let Some(value) = inbound.recv().await {
                if outbound.send(value).is_err() {
                    break;
                }
            }
            Ok(())
        });

        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        in_tx.send("\"a\"".to_string()).unwrap();
        in_tx.send("\"b\"".to_string()).unwrap();
        drop(in_tx);

        handler
            .open(CallContext::channel(1, "echo"), in_rx, out_tx)
            .await
            .unwrap();

        assert_eq!(out_rx.recv().await.unwrap(), "\"a\"");
        assert_eq!(out_rx.recv().await.unwrap(), "\"b\"");
        assert!(out_rx.recv().await.is_none());
    }
}
