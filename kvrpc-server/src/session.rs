//! Registry of live duplex sessions
//!
//! Each open session is recorded under the key `"{conn_id}###{route_id}"`.
//! The entry holds a weak handle to the session's outbound channel and a
//! shutdown signal, so other parts of the application can push values into
//! a session or close it without keeping it alive. The registry is created
//! by the server and handed out by reference; there is no global instance.

use kvrpc_core::{codec, Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{UnboundedSender, WeakUnboundedSender};
use tokio::sync::{watch, Mutex};

/// Separator between connection id and route id in a session key
pub const SESSION_KEY_SEPARATOR: &str = "###";

pub fn session_key(conn_id: u64, route_id: &str) -> String {
    format!("{conn_id}{SESSION_KEY_SEPARATOR}{route_id}")
}

/// Registry entry of one session
#[derive(Debug)]
pub struct SessionHandle {
    key: String,
    conn_id: u64,
    route_id: String,
    opened_at: Instant,
    outbound: WeakUnboundedSender<String>,
    shutdown: watch::Sender<bool>,
}

impl SessionHandle {
    /// Handle plus the receiver the session watches for shutdown
    pub fn new(
        conn_id: u64,
        route_id: impl Into<String>,
        outbound: &UnboundedSender<String>,
    ) -> (Self, watch::Receiver<bool>) {
        let route_id = route_id.into();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = Self {
            key: session_key(conn_id, &route_id),
            conn_id,
            route_id,
            opened_at: Instant::now(),
            outbound: outbound.downgrade(),
            shutdown,
        };
        (handle, shutdown_rx)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            key: self.key.clone(),
            conn_id: self.conn_id,
            route_id: self.route_id.clone(),
            opened_at: self.opened_at,
        }
    }
}

/// Snapshot of a registry entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub key: String,
    pub conn_id: u64,
    pub route_id: String,
    pub opened_at: Instant,
}

/// Map from session key to live session
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a session; returns `false` if the key is already live
    pub async fn insert(&self, handle: SessionHandle) -> bool {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&handle.key) {
            return false;
        }
        sessions.insert(handle.key.clone(), handle);
        true
    }

    /// Drop a session's entry
    ///
    /// Dropping the entry also releases its shutdown signal, which tears the
    /// session down if it is still running.
    pub async fn remove(&self, key: &str) -> Option<SessionInfo> {
        self.sessions
            .lock()
            .await
            .remove(key)
            .map(|handle| handle.info())
    }

    pub async fn get(&self, key: &str) -> Option<SessionInfo> {
        self.sessions.lock().await.get(key).map(SessionHandle::info)
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.sessions.lock().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.sessions.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Keys of every session opened by one connection
    pub async fn keys_for_connection(&self, conn_id: u64) -> Vec<String> {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|handle| handle.conn_id == conn_id)
            .map(|handle| handle.key.clone())
            .collect()
    }

    /// Push an already encoded value to a session's client
    ///
    /// The registry only holds a weak handle to the outbound channel, so a
    /// value gets through only while the session's handler still owns its
    /// response sender. A handler that drops the sender ends the session and
    /// this returns `Error::ConnectionClosed`.
    pub async fn send(&self, key: &str, value: String) -> Result<()> {
        let outbound = {
            let sessions = self.sessions.lock().await;
            let handle = sessions
                .get(key)
                .ok_or_else(|| Error::RouteNotFound(key.to_string()))?;
            handle.outbound.upgrade().ok_or(Error::ConnectionClosed)?
        };
        outbound.send(value).map_err(|_| Error::ConnectionClosed)
    }

    /// Encode and push a value to a session's client
    pub async fn send_value<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        self.send(key, codec::encode_value(value)?).await
    }

    /// Ask a session to shut down; returns `false` for unknown keys
    pub async fn close(&self, key: &str) -> bool {
        match self.sessions.lock().await.get(key) {
            Some(handle) => {
                let _ = handle.shutdown.send(true);
                true
            }
            None => false,
        }
    }

    /// Ask every session to shut down
    pub async fn close_all(&self) {
        let sessions = self.sessions.lock().await;
        for handle in sessions.values() {
            let _ = handle.shutdown.send(true);
        }
        tracing::debug!(sessions = sessions.len(), "Signalled all sessions to close");
    }
}
