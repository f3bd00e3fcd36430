//! Live-session set and notification fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use noteweb_rpc::{Message, RpcPeer};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::connection::ClientConnection;
use crate::metrics::WS_BROADCAST_DROPS_TOTAL;

/// One accepted socket: its send queue and its RPC peer.
#[derive(Clone)]
pub struct LiveSession {
    /// Outbound side of the socket.
    pub connection: Arc<ClientConnection>,
    /// RPC endpoint bound to the socket.
    pub peer: Arc<RpcPeer>,
}

/// Sessions currently connected, keyed by client ID.
pub struct SessionSet {
    sessions: RwLock<HashMap<String, LiveSession>>,
}

impl SessionSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Add a session.
    pub async fn add(&self, session: LiveSession) {
        let mut sessions = self.sessions.write().await;
        let _ = sessions.insert(session.connection.id.clone(), session);
    }

    /// Remove a session by client ID.
    pub async fn remove(&self, client_id: &str) -> Option<LiveSession> {
        self.sessions.write().await.remove(client_id)
    }

    /// Every session live right now.
    pub async fn snapshot(&self) -> Vec<LiveSession> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Remove and return every session.
    pub async fn take_all(&self) -> Vec<LiveSession> {
        self.sessions
            .write()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect()
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether no session is live.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Send a notification to every session live at call time.
    ///
    /// The frame is serialized once. A session whose queue refuses the
    /// frame is logged and skipped. Returns how many sessions accepted it.
    pub async fn broadcast(&self, method: &str, params: Option<Value>) -> usize {
        let text = Arc::new(Message::notification(method, params).encode());
        let sessions = self.sessions.read().await;
        let mut delivered = 0;
        for session in sessions.values() {
            if session.connection.send(Arc::clone(&text)) {
                delivered += 1;
            } else {
                counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                warn!(client_id = %session.connection.id, method, "failed to send broadcast to client");
            }
        }
        debug!(method, recipients = sessions.len(), delivered, "broadcast");
        delivered
    }
}

impl Default for SessionSet {
    fn default() -> Self {
        Self::new()
    }
}
