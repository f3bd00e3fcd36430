//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use noteweb_rpc::{CloseReason, MethodRegistry, Outbound, RpcContext, RpcPeer};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::broadcast::{LiveSession, SessionSet};
use super::codec;
use super::connection::ClientConnection;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};

/// Close code for a connection lost without a close frame. Never sent.
const ABNORMAL_CLOSURE: u16 = 1006;

/// How long the writer gets to flush its close frame.
const WRITER_GRACE: Duration = Duration::from_secs(1);

/// Called with the client ID once per accepted connection.
pub type ConnectHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Everything a session needs from the server.
#[derive(Clone)]
pub struct SessionDeps {
    /// Shared method registry.
    pub registry: Arc<MethodRegistry>,
    /// Shared handler context.
    pub ctx: Arc<RpcContext>,
    /// Live-session set the session joins.
    pub sessions: Arc<SessionSet>,
    /// Capacity of the outbound queue.
    pub send_queue: usize,
    /// Interval between server pings.
    pub heartbeat_interval: Duration,
    /// Silence after which the client is dropped.
    pub heartbeat_timeout: Duration,
    /// Connection-observed side effect.
    pub on_connect: Option<ConnectHook>,
}

/// Run a WebSocket session for a connected client.
///
/// 1. Queues `hello {version}`, then joins the live set
/// 2. Fires the connect hook on its own task
/// 3. Feeds inbound frames to the [`RpcPeer`]
/// 4. Pings periodically and drops silent clients
/// 5. Drains the peer and leaves the live set on disconnect
#[instrument(skip_all, fields(client_id = %client_id))]
pub async fn run_ws_session(ws: WebSocket, client_id: String, deps: SessionDeps) {
    let (ws_tx, mut ws_rx) = ws.split();

    let (send_tx, send_rx) = mpsc::channel::<Arc<String>>(deps.send_queue.max(1));
    let connection = Arc::new(ClientConnection::new(client_id.clone(), send_tx));
    let peer = Arc::new(RpcPeer::new(
        client_id.clone(),
        Arc::clone(&connection) as Arc<dyn Outbound>,
        Arc::clone(&deps.registry),
        Arc::clone(&deps.ctx),
    ));

    let connection_start = Instant::now();
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    // Queued before joining the set so no broadcast overtakes it.
    let version = deps.ctx.versions.current();
    if let Err(err) = peer
        .notify_remote("hello", Some(json!({ "version": version })))
        .await
    {
        warn!(error = %err, "failed to queue hello");
    }

    deps.sessions
        .add(LiveSession {
            connection: Arc::clone(&connection),
            peer: Arc::clone(&peer),
        })
        .await;

    if let Some(hook) = deps.on_connect.clone() {
        let id = client_id.clone();
        drop(tokio::spawn(async move { hook(&id) }));
    }

    let mut writer = tokio::spawn(write_loop(
        ws_tx,
        send_rx,
        Arc::clone(&connection),
        deps.heartbeat_interval,
        deps.heartbeat_timeout,
    ));

    let reason = read_loop(&mut ws_rx, &connection, &peer).await;

    let drained = peer.close_and_drain(&reason);
    let _ = connection.close(reason.clone());
    let _ = deps.sessions.remove(&client_id).await;

    if tokio::time::timeout(WRITER_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }

    info!(
        code = reason.code,
        reason = %reason.reason,
        drained,
        dropped = connection.drop_count(),
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection_start.elapsed().as_secs_f64());
}

/// Read frames until the socket ends or a close is requested.
async fn read_loop(
    ws_rx: &mut SplitStream<WebSocket>,
    connection: &ClientConnection,
    peer: &Arc<RpcPeer>,
) -> CloseReason {
    loop {
        let frame = tokio::select! {
            () = connection.closing() => {
                return connection
                    .close_reason()
                    .unwrap_or_else(CloseReason::server_stopping);
            }
            frame = ws_rx.next() => frame,
        };

        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(err)) => {
                debug!(error = %err, "websocket read error");
                return CloseReason::new(ABNORMAL_CLOSURE, "connection error");
            }
            None => return CloseReason::new(ABNORMAL_CLOSURE, "connection lost"),
        };
        connection.mark_seen();

        if let Message::Close(frame) = &msg {
            info!("client sent close frame");
            return frame.as_ref().map_or_else(
                || CloseReason::new(CloseReason::NORMAL, ""),
                |f| CloseReason::new(f.code, f.reason.as_str()),
            );
        }

        let text = codec::decode(&msg);
        if text.trim().is_empty() {
            continue;
        }
        peer.handle_incoming(&text);
    }
}

/// Drain the outbound queue onto the socket and keep the client alive.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<Arc<String>>,
    connection: Arc<ClientConnection>,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
) {
    let mut ping_interval = tokio::time::interval(heartbeat_interval);
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            biased;
            () = connection.closing() => break,
            msg = send_rx.recv() => {
                let Some(text) = msg else { break };
                if ws_tx.send(codec::encode(&text)).await.is_err() {
                    let _ = connection.close(CloseReason::new(ABNORMAL_CLOSURE, "send failed"));
                    break;
                }
            }
            _ = ping_interval.tick() => {
                if connection.last_seen_elapsed() > heartbeat_timeout {
                    warn!(
                        timeout_secs = heartbeat_timeout.as_secs(),
                        "client unresponsive, disconnecting"
                    );
                    let _ = connection.close(CloseReason::new(
                        CloseReason::GOING_AWAY,
                        "heartbeat timeout",
                    ));
                    break;
                }
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    let _ = connection.close(CloseReason::new(ABNORMAL_CLOSURE, "send failed"));
                    break;
                }
            }
        }
    }

    // Best effort: the peer may already be gone.
    if let Some(frame) = connection.close_reason().as_ref().and_then(close_frame) {
        let _ = ws_tx.send(Message::Close(Some(frame))).await;
    }
    let _ = ws_tx.close().await;
}

/// Close frame for `reason`, or `None` for codes that must not be sent.
fn close_frame(reason: &CloseReason) -> Option<CloseFrame> {
    matches!(reason.code, 1000..=1003 | 1007..=1014 | 3000..=4999).then(|| CloseFrame {
        code: reason.code,
        reason: reason.reason.as_str().into(),
    })
}
