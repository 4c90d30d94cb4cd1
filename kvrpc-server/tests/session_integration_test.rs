//! Duplex session integration tests for kvrpc-server

use futures::{SinkExt, StreamExt};
use kvrpc_core::{codec, Error};
use kvrpc_server::{
    channel_from_fn, CallContext, ChannelBinding, KvServer, Router, ServiceManager, SessionRegistry,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::{connect_async, tungstenite};
use warp::ws::Message;

struct ChatService;

fn chat_manager() -> ServiceManager<ChatService> {
    let mut manager = ServiceManager::new("ChatService", |_: &CallContext| Ok(Arc::new(ChatService)));
    manager.bind_channel(
        "chat",
        |_chat: Arc<ChatService>,
         mut incoming: UnboundedReceiver<String>,
         outgoing: UnboundedSender<String>| async move {
            while let Some(text) = incoming.recv().await {
                if outgoing.send(format!("echo:{text}")).is_err() {
                    break;
                }
            }
            Ok(())
        },
    );
    manager.bind_channel(
        "once",
        |_chat: Arc<ChatService>,
         mut incoming: UnboundedReceiver<i64>,
         outgoing: UnboundedSender<i64>| async move {
            if let Some(n) = incoming.recv().await {
                let _ = outgoing.send(n + 1);
            }
            Ok(())
        },
    );
    manager.bind_channel(
        "silent",
        |_chat: Arc<ChatService>,
         mut incoming: UnboundedReceiver<String>,
         outgoing: UnboundedSender<String>| async move {
            // keep the sender so the session stays open
            let _outgoing = outgoing;
            while incoming.recv().await.is_some() {}
            Ok(())
        },
    );
    manager.bind_channel(
        "linger",
        |_chat: Arc<ChatService>,
         _incoming: UnboundedReceiver<String>,
         outgoing: UnboundedSender<String>| async move {
            let held = outgoing.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                drop(held);
            });
            let _ = outgoing.send("bye".to_string());
            Ok(())
        },
    );
    manager.bind_channel(
        "failing",
        |_chat: Arc<ChatService>,
         mut incoming: UnboundedReceiver<String>,
         outgoing: UnboundedSender<String>| async move {
            let _outgoing = outgoing;
            incoming.recv().await;
            Err(Error::service("chat backend unavailable"))
        },
    );
    manager.bind_channel(
        "exploding",
        |_chat: Arc<ChatService>,
         mut incoming: UnboundedReceiver<String>,
         outgoing: UnboundedSender<String>| async move {
            let _outgoing = outgoing;
            if incoming.recv().await.is_some() {
                panic!("chat handler exploded");
            }
            Ok(())
        },
    );
    manager
}

async fn build_server() -> KvServer {
    KvServer::builder()
        .bind_str("127.0.0.1:0")
        .unwrap()
        .service(chat_manager())
        .build()
        .await
        .unwrap()
}

fn frame(param: &str) -> String {
    let encoded = codec::encode_value(param).unwrap();
    format!(r#"{{"id":0,"params":[{}]}}"#, serde_json::to_string(&encoded).unwrap())
}

async fn wait_for_sessions(sessions: &SessionRegistry, expected: usize) {
    for _ in 0..100 {
        if sessions.len().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {expected} sessions, found {}",
        sessions.len().await
    );
}

#[tokio::test]
async fn test_echo_preserves_order() {
    let server = build_server().await;
    let mut client = warp::test::ws()
        .path("/kvws/chat")
        .handshake(server.routes())
        .await
        .expect("handshake");

    for text in ["A", "B", "C"] {
        client.send_text(frame(text)).await;
    }

    for text in ["A", "B", "C"] {
        let msg = client.recv().await.unwrap();
        assert_eq!(
            msg.to_str().unwrap(),
            format!(r#"{{"id":0,"result":"\"echo:{text}\""}}"#)
        );
    }
}

#[tokio::test]
async fn test_session_registered_while_open() {
    let server = build_server().await;
    let sessions = server.sessions();
    let mut client = warp::test::ws()
        .path("/kvws/chat")
        .handshake(server.routes())
        .await
        .expect("handshake");

    client.send_text(frame("hi")).await;
    client.recv().await.unwrap();

    let keys = sessions.keys().await;
    assert_eq!(keys.len(), 1);
    assert!(keys[0].ends_with("###chat"), "key {}", keys[0]);

    client.send(Message::close()).await;
    wait_for_sessions(&sessions, 0).await;
}

#[tokio::test]
async fn test_handler_completion_closes_socket() {
    let server = build_server().await;
    let sessions = server.sessions();
    let mut client = warp::test::ws()
        .path("/kvws/once")
        .handshake(server.routes())
        .await
        .expect("handshake");

    client.send_text(r#"{"id":0,"params":["41"]}"#).await;
    let msg = client.recv().await.unwrap();
    assert_eq!(msg.to_str().unwrap(), r#"{"id":0,"result":"42"}"#);

    assert!(client.recv_closed().await.is_ok());
    wait_for_sessions(&sessions, 0).await;
}

#[tokio::test]
async fn test_frames_without_one_param_are_dropped() {
    let server = build_server().await;
    let mut client = warp::test::ws()
        .path("/kvws/chat")
        .handshake(server.routes())
        .await
        .expect("handshake");

    client.send_text(r#"{"id":0,"params":["\"x\"","\"y\""]}"#).await;
    client.send_text(r#"{"id":0,"params":[]}"#).await;
    client.send_text("garbage").await;
    client.send_text(frame("kept")).await;

    let msg = client.recv().await.unwrap();
    assert_eq!(msg.to_str().unwrap(), r#"{"id":0,"result":"\"echo:kept\""}"#);
}

#[tokio::test]
async fn test_unknown_route_is_closed() {
    let server = build_server().await;
    let sessions = server.sessions();
    let mut client = warp::test::ws()
        .path("/kvws/nowhere")
        .handshake(server.routes())
        .await
        .expect("handshake");

    match client.recv().await {
        Ok(msg) => {
            assert!(msg.is_close());
            assert_eq!(msg.close_frame().map(|(code, _)| code), Some(1008));
        }
        Err(_) => {}
    }
    assert!(sessions.is_empty().await);
}

#[tokio::test]
async fn test_registry_push_and_close() {
    let server = build_server().await;
    let sessions = server.sessions();
    let mut client = warp::test::ws()
        .path("/kvws/silent")
        .handshake(server.routes())
        .await
        .expect("handshake");

    wait_for_sessions(&sessions, 1).await;
    let key = sessions.keys().await.remove(0);

    sessions.send_value(&key, "pushed").await.unwrap();
    let msg = client.recv().await.unwrap();
    assert_eq!(msg.to_str().unwrap(), r#"{"id":0,"result":"\"pushed\""}"#);

    assert!(sessions.close(&key).await);
    wait_for_sessions(&sessions, 0).await;
}

#[tokio::test]
async fn test_session_ends_when_handler_returns_with_live_sender() {
    let server = build_server().await;
    let sessions = server.sessions();
    let mut client = warp::test::ws()
        .path("/kvws/linger")
        .handshake(server.routes())
        .await
        .expect("handshake");

    let msg = client.recv().await.unwrap();
    assert_eq!(msg.to_str().unwrap(), r#"{"id":0,"result":"\"bye\""}"#);

    assert!(client.recv_closed().await.is_ok());
    wait_for_sessions(&sessions, 0).await;
}

#[tokio::test]
async fn test_raw_channel_handler_with_live_sender() {
    let mut router = Router::new();
    router.register_channel(ChannelBinding::new(
        "raw",
        channel_from_fn(
            |_ctx: CallContext, _inbound: UnboundedReceiver<String>, outbound: UnboundedSender<String>| async move {
                let held = outbound.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    drop(held);
                });
                let _ = outbound.send("\"done\"".to_string());
                Ok(())
            },
        ),
    ));
    let server = KvServer::builder()
        .bind_str("127.0.0.1:0")
        .unwrap()
        .router(router)
        .build()
        .await
        .unwrap();
    let sessions = server.sessions();
    let mut client = warp::test::ws()
        .path("/kvws/raw")
        .handshake(server.routes())
        .await
        .expect("handshake");

    let msg = client.recv().await.unwrap();
    assert_eq!(msg.to_str().unwrap(), r#"{"id":0,"result":"\"done\""}"#);
    assert!(client.recv_closed().await.is_ok());
    wait_for_sessions(&sessions, 0).await;
}

#[tokio::test]
async fn test_handler_error_removes_session() {
    let server = build_server().await;
    let sessions = server.sessions();
    let mut client = warp::test::ws()
        .path("/kvws/failing")
        .handshake(server.routes())
        .await
        .expect("handshake");

    wait_for_sessions(&sessions, 1).await;
    client.send_text(frame("go")).await;

    assert!(client.recv_closed().await.is_ok());
    wait_for_sessions(&sessions, 0).await;
}

#[tokio::test]
async fn test_handler_panic_removes_session() {
    let server = build_server().await;
    let sessions = server.sessions();
    let mut client = warp::test::ws()
        .path("/kvws/exploding")
        .handshake(server.routes())
        .await
        .expect("handshake");

    wait_for_sessions(&sessions, 1).await;
    client.send_text(frame("go")).await;

    assert!(client.recv_closed().await.is_ok());
    wait_for_sessions(&sessions, 0).await;

    // other sessions keep working
    let mut chat = warp::test::ws()
        .path("/kvws/chat")
        .handshake(server.routes())
        .await
        .expect("handshake");
    chat.send_text(frame("still here")).await;
    assert_eq!(
        chat.recv().await.unwrap().to_str().unwrap(),
        r#"{"id":0,"result":"\"echo:still here\""}"#
    );
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let server = build_server().await;
    let routes = server.routes();
    let sessions = server.sessions();

    let mut first = warp::test::ws()
        .path("/kvws/chat")
        .handshake(routes.clone())
        .await
        .expect("handshake");
    let mut second = warp::test::ws()
        .path("/kvws/chat")
        .handshake(routes)
        .await
        .expect("handshake");
    wait_for_sessions(&sessions, 2).await;

    first.send_text(frame("one")).await;
    second.send_text(frame("two")).await;

    assert_eq!(
        second.recv().await.unwrap().to_str().unwrap(),
        r#"{"id":0,"result":"\"echo:two\""}"#
    );
    assert_eq!(
        first.recv().await.unwrap().to_str().unwrap(),
        r#"{"id":0,"result":"\"echo:one\""}"#
    );
}

#[tokio::test]
async fn test_echo_over_real_socket() {
    let server = build_server().await;
    let addr = server.local_addr().unwrap();
    let sessions = server.sessions();

    tokio::spawn(async move {
        let _ = server.run().await;
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (mut socket, _) = connect_async(format!("ws://{addr}/kvws/chat"))
        .await
        .expect("connect");

    for text in ["A", "B", "C"] {
        socket
            .send(tungstenite::Message::Text(frame(text)))
            .await
            .unwrap();
    }

    for text in ["A", "B", "C"] {
        let msg = socket.next().await.unwrap().unwrap();
        assert_eq!(
            msg.into_text().unwrap(),
            format!(r#"{{"id":0,"result":"\"echo:{text}\""}}"#)
        );
    }
    assert_eq!(sessions.len().await, 1);

    socket.close(None).await.unwrap();
    wait_for_sessions(&sessions, 0).await;
}
