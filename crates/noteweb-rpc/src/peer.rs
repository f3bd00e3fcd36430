//! Per-connection JSON-RPC endpoint.
//!
//! An [`RpcPeer`] answers the client's requests through the shared
//! [`MethodRegistry`] and lets the server call the client back. Outbound
//! calls wait in a pending table keyed by request id until the matching
//! response arrives or the peer is drained.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use metrics::counter;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::RpcContext;
use crate::errors::{self, CallError};
use crate::registry::MethodRegistry;
use crate::types::{Message, Notification, Request, Response, RpcId};

/// Where a peer's outbound frames go.
///
/// Responses and outbound calls must not be lost, so implementations wait
/// for queue room rather than dropping the frame.
#[async_trait]
pub trait Outbound: Send + Sync + 'static {
    /// Queue one text frame, waiting while the queue is full. Returns
    /// `false` only if the connection is gone.
    async fn send_text(&self, text: Arc<String>) -> bool;
}

/// WebSocket close code and reason carried into drained calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseReason {
    /// WebSocket close code.
    pub code: u16,
    /// Human-readable reason.
    pub reason: String,
}

impl CloseReason {
    /// Normal closure (1000).
    pub const NORMAL: u16 = 1000;
    /// Endpoint going away (1001).
    pub const GOING_AWAY: u16 = 1001;

    /// Build a close reason.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Reason used when the server shuts down.
    pub fn server_stopping() -> Self {
        Self::new(Self::GOING_AWAY, "server stopping")
    }

    fn to_call_error(&self) -> CallError {
        CallError::ConnectionClosed {
            code: self.code,
            reason: self.reason.clone(),
        }
    }
}

type CallResult = Result<Value, CallError>;

struct PendingCall {
    method: String,
    issued_at: Instant,
    tx: oneshot::Sender<CallResult>,
}

/// One full-duplex RPC endpoint per socket.
pub struct RpcPeer {
    client_id: String,
    outbound: Arc<dyn Outbound>,
    registry: Arc<MethodRegistry>,
    ctx: Arc<RpcContext>,
    pending: Mutex<HashMap<RpcId, PendingCall>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    close_reason: Mutex<Option<CloseReason>>,
    cancel: CancellationToken,
}

impl RpcPeer {
    /// Create a peer for one connection.
    pub fn new(
        client_id: impl Into<String>,
        outbound: Arc<dyn Outbound>,
        registry: Arc<MethodRegistry>,
        ctx: Arc<RpcContext>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            outbound,
            registry,
            ctx,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            close_reason: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Route one inbound text frame.
    ///
    /// Requests and notifications run on their own tasks, so this returns
    /// without waiting for handlers. Invalid envelopes are dropped.
    pub fn handle_incoming(self: &Arc<Self>, text: &str) {
        if self.is_closed() {
            return;
        }
        let message = match Message::decode(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(client_id = %self.client_id, error = %e, "dropping invalid message");
                counter!("rpc_dropped_messages_total").increment(1);
                return;
            }
        };
        match message {
            Message::Request(request) => self.spawn_request(request),
            Message::Notification(notification) => self.spawn_notification(notification),
            Message::Response(response) => self.resolve(response),
        }
    }

    fn spawn_request(self: &Arc<Self>, request: Request) {
        let peer = Arc::clone(self);
        let id = request.id.clone();
        let method = request.method.clone();
        drop(tokio::spawn(async move {
            let work = AssertUnwindSafe(peer.registry.dispatch(request, &peer.ctx)).catch_unwind();
            let response = tokio::select! {
                () = peer.cancel.cancelled() => {
                    debug!(client_id = %peer.client_id, method, "request cancelled by drain");
                    return;
                }
                outcome = work => match outcome {
                    Ok(response) => response,
                    Err(_panic) => {
                        error!(client_id = %peer.client_id, method, "handler panicked");
                        Response::error(id, errors::APPLICATION_ERROR, "Internal error")
                    }
                },
            };
            if !peer.cancel.is_cancelled() && !peer.send(&Message::Response(response)).await {
                warn!(client_id = %peer.client_id, method, "failed to queue response");
            }
        }));
    }

    fn spawn_notification(self: &Arc<Self>, notification: Notification) {
        let peer = Arc::clone(self);
        drop(tokio::spawn(async move {
            let work =
                AssertUnwindSafe(peer.registry.notify(notification, &peer.ctx)).catch_unwind();
            tokio::select! {
                () = peer.cancel.cancelled() => {}
                outcome = work => {
                    if outcome.is_err() {
                        error!(client_id = %peer.client_id, "notification handler panicked");
                    }
                }
            }
        }));
    }

    fn resolve(&self, response: Response) {
        let Some(call) = self.pending.lock().remove(response.id()) else {
            debug!(client_id = %self.client_id, id = %response.id(), "response for unknown id discarded");
            return;
        };
        debug!(
            client_id = %self.client_id,
            method = %call.method,
            elapsed_ms = u64::try_from(call.issued_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            "remote call answered"
        );
        let outcome = match response {
            Response::Success { result, .. } => Ok(result),
            Response::Error { error, .. } => Err(CallError::Remote {
                code: error.code,
                message: error.message,
                data: error.data,
            }),
        };
        // The caller may have timed out and dropped its receiver.
        let _ = call.tx.send(outcome);
    }

    /// Call a method on the client and wait for its answer.
    ///
    /// There is no deadline; the call ends with the matching response or
    /// when the peer is drained.
    pub async fn call_remote(&self, method: &str, params: Option<Value>) -> CallResult {
        let (_, rx) = self.start_call(method, params).await?;
        self.finish_call(rx).await
    }

    /// [`call_remote`](Self::call_remote) with a deadline. On expiry the
    /// pending entry is removed and [`CallError::Timeout`] returned.
    pub async fn call_remote_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> CallResult {
        let (id, rx) = self.start_call(method, params).await?;
        match tokio::time::timeout(timeout, self.finish_call(rx)).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => {
                let _ = self.pending.lock().remove(&id);
                Err(CallError::Timeout(timeout))
            }
        }
    }

    async fn start_call(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(RpcId, oneshot::Receiver<CallResult>), CallError> {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut pending = self.pending.lock();
            // Checked under the lock so a concurrent drain cannot miss this entry.
            if self.is_closed() {
                return Err(self.closed_error());
            }
            let id = loop {
                let candidate = RpcId::from(self.next_id.fetch_add(1, Ordering::Relaxed));
                if !pending.contains_key(&candidate) {
                    break candidate;
                }
            };
            let _ = pending.insert(
                id.clone(),
                PendingCall {
                    method: method.to_owned(),
                    issued_at: Instant::now(),
                    tx,
                },
            );
            id
        };

        counter!("rpc_outbound_calls_total", "method" => method.to_owned()).increment(1);
        let message = Message::request(id.clone(), method, params);
        if !self.send(&message).await {
            let _ = self.pending.lock().remove(&id);
            if self.is_closed() {
                return Err(self.closed_error());
            }
            return Err(CallError::SendFailed);
        }
        Ok((id, rx))
    }

    async fn finish_call(&self, rx: oneshot::Receiver<CallResult>) -> CallResult {
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(self.closed_error()),
        }
    }

    /// Send a notification to the client. No answer is expected.
    pub async fn notify_remote(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), CallError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        if self.send(&Message::notification(method, params)).await {
            Ok(())
        } else {
            Err(CallError::SendFailed)
        }
    }

    /// Fail every pending call with `reason`, cancel in-flight handlers and
    /// refuse further calls.
    ///
    /// Idempotent: only the first call has any effect. Returns the number of
    /// pending calls that were failed.
    pub fn close_and_drain(&self, reason: &CloseReason) -> usize {
        {
            let mut slot = self.close_reason.lock();
            if slot.is_some() {
                return 0;
            }
            *slot = Some(reason.clone());
        }
        // Reason is recorded before the flag so racing callers report it.
        self.closed.store(true, Ordering::Release);
        self.cancel.cancel();

        let drained: Vec<PendingCall> = self.pending.lock().drain().map(|(_, call)| call).collect();
        let count = drained.len();
        for call in drained {
            let _ = call.tx.send(Err(reason.to_call_error()));
        }
        info!(
            client_id = %self.client_id,
            code = reason.code,
            reason = %reason.reason,
            failed_calls = count,
            "peer drained"
        );
        count
    }

    /// Whether [`close_and_drain`](Self::close_and_drain) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Ids of outbound calls still awaiting an answer.
    pub fn pending_ids(&self) -> Vec<RpcId> {
        self.pending.lock().keys().cloned().collect()
    }

    /// Number of outbound calls still awaiting an answer.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn closed_error(&self) -> CallError {
        self.close_reason
            .lock()
            .as_ref()
            .map_or_else(
                || CloseReason::new(CloseReason::NORMAL, "connection closed").to_call_error(),
                CloseReason::to_call_error,
            )
    }

    async fn send(&self, message: &Message) -> bool {
        self.outbound.send_text(Arc::new(message.encode())).await
    }
}

impl Drop for RpcPeer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
