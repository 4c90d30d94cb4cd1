//! HTTP and WebSocket filters
//!
//! - `/kv/{route}` accepts any verb. Known verbs go to the dispatcher; the
//!   envelope comes from the body, or for `GET` from the `id` query
//!   parameter. Replies are `200 application/json` with the response
//!   envelope, `404` for unknown routes, `400` for malformed envelopes,
//!   `503` when admission control refuses the call and `405` for verbs
//!   outside the supported set.
//! - `/kvws/{route}` upgrades to a WebSocket and hands the socket to the
//!   session router.
//!
//! The combined filter can be served by [`crate::KvServer`] or mounted into
//! an existing warp application.

use crate::connection::ChannelService;
use crate::context::CallContext;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::router::route_id_from_path;
use kvrpc_core::{codec, HttpVerb};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use warp::hyper::body::Bytes;
use warp::http::{header, HeaderMap, Method, StatusCode};
use warp::path::Tail;
use warp::reply::Response;
use warp::ws::Ws;
use warp::{Filter, Rejection, Reply};

const UNARY_SEGMENT: &str = "kv";
const CHANNEL_SEGMENT: &str = "kvws";

/// Both transports combined
pub fn routes(
    dispatcher: Dispatcher,
    channels: ChannelService,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    unary(dispatcher).or(channel(channels)).unify()
}

/// `/kv/{route}` request/response transport
pub fn unary(
    dispatcher: Dispatcher,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    let dispatcher = warp::any().map(move || dispatcher.clone());
    warp::path(UNARY_SEGMENT)
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::method())
        .and(warp::query::<HashMap<String, String>>())
        .and(warp::header::headers_cloned())
        .and(warp::addr::remote())
        .and(warp::body::bytes())
        .and(dispatcher)
        .and_then(handle_unary)
}

/// `/kvws/{route}` duplex transport
pub fn channel(
    channels: ChannelService,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    let channels = warp::any().map(move || channels.clone());
    warp::path(CHANNEL_SEGMENT)
        .and(warp::path::tail())
        .and(warp::ws())
        .and(warp::header::headers_cloned())
        .and(warp::addr::remote())
        .and(channels)
        .map(
            |tail: Tail,
             ws: Ws,
             headers: HeaderMap,
             remote: Option<SocketAddr>,
             channels: ChannelService| {
                let route_id = route_id_from_path(tail.as_str())
                    .unwrap_or_default()
                    .to_string();
                let ctx = CallContext::channel(channels.next_conn_id(), route_id)
                    .with_remote_addr(remote)
                    .with_headers(header_pairs(&headers));
                ws.on_upgrade(move |socket| channels.accept(socket, ctx))
                    .into_response()
            },
        )
}

#[allow(clippy::too_many_arguments)]
async fn handle_unary(
    route_id: String,
    method: Method,
    query: HashMap<String, String>,
    headers: HeaderMap,
    remote: Option<SocketAddr>,
    body: Bytes,
    dispatcher: Dispatcher,
) -> Result<Response, Infallible> {
    let verb = match method.as_str().parse::<HttpVerb>() {
        Ok(verb) => verb,
        Err(_) => return Ok(status(StatusCode::METHOD_NOT_ALLOWED)),
    };
    // a missing or unparsable id falls back to 0
    let query_id = query.get("id").and_then(|id| id.parse::<i64>().ok());
    let ctx = CallContext::unary(verb, route_id.as_str())
        .with_remote_addr(remote)
        .with_headers(header_pairs(&headers));

    let reply = match dispatcher
        .dispatch(verb, &route_id, query_id, &body, ctx)
        .await
    {
        DispatchOutcome::Reply(response) => match codec::encode_response(&response) {
            Ok(text) => json(text),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode response envelope");
                status(StatusCode::INTERNAL_SERVER_ERROR)
            }
        },
        DispatchOutcome::NotFound => status(StatusCode::NOT_FOUND),
        DispatchOutcome::Malformed(_) => status(StatusCode::BAD_REQUEST),
        DispatchOutcome::Overloaded => status(StatusCode::SERVICE_UNAVAILABLE),
    };
    Ok(reply)
}

fn json(text: String) -> Response {
    warp::reply::with_header(text, header::CONTENT_TYPE, "application/json").into_response()
}

fn status(code: StatusCode) -> Response {
    warp::reply::with_status(warp::reply(), code).into_response()
}

fn header_pairs(headers: &HeaderMap) -> impl Iterator<Item = (&str, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::{Route, ServiceManager};
    use crate::dispatcher::DispatchConfig;
    use crate::router::Router;
    use crate::session::SessionRegistry;
    use std::sync::Arc;

    struct Greeter;

    fn filter() -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
        let mut manager = ServiceManager::new("Greeter", |_: &CallContext| Ok(Arc::new(Greeter)));
        manager.bind1("hello", |_g: Arc<Greeter>, name: String| async move {
            Ok(format!("hello {name}"))
        });
        manager.bind0(Route::get("ping"), |_g: Arc<Greeter>| async move { Ok("pong") });
        manager.bind0(
            Route::post("whoami"),
            |_g: Arc<Greeter>| async move { Ok(()) },
        );
        let mut router = Router::new();
        router.mount(manager);
        let dispatcher = Dispatcher::new(router.clone(), DispatchConfig::default());
        routes(dispatcher, ChannelService::new(router, SessionRegistry::new()))
    }

    #[tokio::test]
    async fn test_post_returns_json_envelope() {
        let res = warp::test::request()
            .method("POST")
            .path("/kv/hello")
            .body(r#"{"id":3,"params":["\"Ann\""]}"#)
            .reply(&filter())
            .await;

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(res.body(), r#"{"id":3,"result":"\"hello Ann\""}"#);
    }

    #[tokio::test]
    async fn test_get_with_query_id() {
        let res = warp::test::request()
            .method("GET")
            .path("/kv/ping?id=42")
            .reply(&filter())
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.body(), r#"{"id":42,"result":"\"pong\""}"#);

        let res = warp::test::request()
            .method("GET")
            .path("/kv/ping")
            .reply(&filter())
            .await;
        assert_eq!(res.body(), r#"{"id":0,"result":"\"pong\""}"#);
    }

    #[tokio::test]
    async fn test_status_codes() {
        let not_found = warp::test::request()
            .method("POST")
            .path("/kv/unknown")
            .body(r#"{"id":1,"params":[]}"#)
            .reply(&filter())
            .await;
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);
        assert!(not_found.body().is_empty());

        let wrong_verb = warp::test::request()
            .method("GET")
            .path("/kv/hello")
            .reply(&filter())
            .await;
        assert_eq!(wrong_verb.status(), StatusCode::NOT_FOUND);

        let malformed = warp::test::request()
            .method("POST")
            .path("/kv/hello")
            .body("{")
            .reply(&filter())
            .await;
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

        let unsupported = warp::test::request()
            .method("PATCH")
            .path("/kv/hello")
            .reply(&filter())
            .await;
        assert_eq!(unsupported.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_unit_result() {
        let res = warp::test::request()
            .method("POST")
            .path("/kv/whoami")
            .body(r#"{"id":5,"params":[]}"#)
            .reply(&filter())
            .await;
        assert_eq!(res.body(), r#"{"id":5,"result":"null"}"#);
    }
}
