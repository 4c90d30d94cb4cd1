//! Duplex session router
//!
//! Every upgraded socket on `/kvws/{route}` becomes one session bound to a
//! channel binding. Three tasks cooperate per session:
//!
//! - **send task**: drains the outbound channel, wraps each value into a
//!   stream envelope (`id` 0) and writes it as a text frame. When the
//!   channel closes it closes the socket.
//! - **recv task**: decodes each text frame as a request envelope and
//!   forwards its single parameter into the inbound channel. Frames with a
//!   different parameter count, or that fail to decode, are logged and
//!   dropped. Ends on a close frame or a socket error.
//! - **handler task**: runs the binding with the two channels.
//!
//! When the handler finishes, reading stops and the send task flushes what
//! was queued before the socket is closed, whether or not clones of the
//! outbound sender are still alive. When the client goes away, the
//! handler and the send task are aborted. Either way the session's registry
//! entry is removed. A route that resolves to no binding is closed at once
//! with a policy-violation close frame.

use crate::context::CallContext;
use crate::metrics::ServerMetrics;
use crate::router::Router;
use crate::session::{SessionHandle, SessionRegistry};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use kvrpc_core::{codec, Error, Result, RpcResponse};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use warp::ws::{Message, WebSocket};

/// Close code sent when the route has no channel binding
pub const CLOSE_ROUTE_NOT_FOUND: u16 = 1008;

/// Accepts upgraded sockets and runs their sessions
#[derive(Clone)]
pub struct ChannelService {
    router: Router,
    sessions: SessionRegistry,
    next_conn_id: Arc<AtomicU64>,
    metrics: Option<Arc<ServerMetrics>>,
}

impl ChannelService {
    pub fn new(router: Router, sessions: SessionRegistry) -> Self {
        Self {
            router,
            sessions,
            next_conn_id: Arc::new(AtomicU64::new(1)),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<ServerMetrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Allocate the id of a new connection
    pub fn next_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Run the session of one upgraded socket to completion
    pub async fn accept(self, socket: WebSocket, ctx: CallContext) {
        let conn_id = ctx.conn_id.unwrap_or_else(|| self.next_conn_id());
        if let Err(e) = handle_connection(
            socket,
            conn_id,
            ctx,
            self.router,
            self.sessions,
            self.metrics.clone(),
        )
        .await
        {
            tracing::warn!(conn_id, error = %e, "Session ended with error");
            if let Some(metrics) = &self.metrics {
                metrics.record_error(if e.is_transport() { "transport" } else { "session" });
            }
        }
    }
}

#[tracing::instrument(skip(socket, ctx, router, sessions, metrics), fields(conn_id = conn_id, route = %ctx.route_id))]
pub async fn handle_connection(
    socket: WebSocket,
    conn_id: u64,
    ctx: CallContext,
    router: Router,
    sessions: SessionRegistry,
    metrics: Option<Arc<ServerMetrics>>,
) -> Result<()> {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Some(binding) = router.resolve_channel(&ctx.route_id) else {
        tracing::warn!("No channel bound to route, closing");
        let _ = ws_sender
            .send(Message::close_with(CLOSE_ROUTE_NOT_FOUND, "route not found"))
            .await;
        let _ = ws_sender.close().await;
        return Err(Error::RouteNotFound(ctx.route_id));
    };

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

    let (handle, mut shutdown_rx) = SessionHandle::new(conn_id, binding.route_id(), &outbound_tx);
    let key = handle.key().to_string();
    if !sessions.insert(handle).await {
        let _ = ws_sender.close().await;
        return Err(Error::Internal(format!("session {key} already open")));
    }
    if let Some(metrics) = &metrics {
        metrics.record_session_opened(sessions.len().await as i64);
    }
    tracing::info!(session = %key, "Session opened");

    let (flush_tx, mut flush_rx) = oneshot::channel::<()>();
    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                value = outbound_rx.recv() => match value {
                    Some(value) => {
                        if !send_item(&mut ws_sender, value).await {
                            return;
                        }
                    }
                    None => break,
                },
                _ = &mut flush_rx => {
                    // the handler is done; clones of its sender may still exist
                    outbound_rx.close();
                    while let Ok(value) = outbound_rx.try_recv() {
                        if !send_item(&mut ws_sender, value).await {
                            return;
                        }
                    }
                    break;
                }
            }
        }
        let _ = ws_sender.close().await;
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(message) = ws_receiver.next().await {
            match message {
                Ok(msg) if msg.is_text() => {
                    forward_frame(msg.to_str().unwrap_or_default(), &inbound_tx)
                }
                Ok(msg) if msg.is_close() => {
                    tracing::info!("Connection closed by client");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "WebSocket error");
                    break;
                }
            }
        }
    });

    let session_ctx = ctx.with_session(key.clone());
    let mut handler_task =
        tokio::spawn(async move { binding.run(session_ctx, inbound_rx, outbound_tx).await });

    tokio::select! {
        result = &mut handler_task => {
            match result {
                Ok(Ok(())) => tracing::debug!("Handler finished"),
                Ok(Err(e)) => tracing::error!(error = %e, "Handler failed"),
                Err(e) => tracing::error!(error = %e, "Handler task did not complete"),
            }
            // flush what the handler queued unless the client is already gone
            let _ = flush_tx.send(());
            tokio::select! {
                _ = &mut send_task => {}
                _ = &mut recv_task => send_task.abort(),
                _ = shutdown_rx.changed() => {
                    tracing::info!("Session closed by server");
                    send_task.abort();
                }
            }
            recv_task.abort();
        }
        _ = &mut recv_task => {
            handler_task.abort();
            send_task.abort();
        }
        _ = &mut send_task => {
            handler_task.abort();
            recv_task.abort();
        }
        _ = shutdown_rx.changed() => {
            tracing::info!("Session closed by server");
            handler_task.abort();
            recv_task.abort();
            send_task.abort();
        }
    }

    sessions.remove(&key).await;
    if let Some(metrics) = &metrics {
        metrics.record_session_closed(sessions.len().await as i64);
    }
    tracing::info!(session = %key, "Session cleaned up");

    Ok(())
}

/// Write one stream envelope; `false` once the socket is unusable
async fn send_item(sink: &mut SplitSink<WebSocket, Message>, value: String) -> bool {
    let frame = match codec::encode_response(&RpcResponse::stream_item(value)) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode stream envelope");
            return true;
        }
    };
    if let Err(e) = sink.send(Message::text(frame)).await {
        tracing::error!(error = %e, "Error sending frame");
        return false;
    }
    true
}

/// Forward the single parameter of a request frame into the session
fn forward_frame(text: &str, inbound: &mpsc::UnboundedSender<String>) {
    match codec::decode_request_text(text) {
        Ok(mut request) if request.params.len() == 1 => {
            let value = request
                .params
                .pop()
                .flatten()
                .unwrap_or_else(|| "null".to_string());
            // the handler may have stopped reading; later frames are ignored
            let _ = inbound.send(value);
        }
        Ok(request) => {
            tracing::warn!(params = request.params.len(), "Dropping frame without exactly one parameter")
        }
        Err(e) => tracing::warn!(error = %e, "Dropping malformed frame"),
    }
}
