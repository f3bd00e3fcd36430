//! WebSocket client connection state.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::counter;
use noteweb_rpc::{CloseReason, Outbound};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::metrics::WS_SEND_DROPS_TOTAL;

/// A connected WebSocket client.
///
/// Frames are queued on a bounded channel drained by the session's writer
/// task. Broadcasts use [`send`](Self::send) and are dropped for this
/// client only when the queue is full. RPC traffic uses
/// [`send_wait`](Self::send_wait) and waits for room.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: String,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// When the last frame (of any kind) was received.
    last_seen: Mutex<Instant>,
    /// Count of messages dropped due to full channel.
    dropped_messages: AtomicU64,
    /// First close request wins.
    close_reason: Mutex<Option<CloseReason>>,
    closing: CancellationToken,
}

impl ClientConnection {
    /// Create a new connection.
    pub fn new(id: String, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            connected_at: now,
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            close_reason: Mutex::new(None),
            closing: CancellationToken::new(),
        }
    }

    /// Queue a text frame for the client.
    ///
    /// Returns `false` if the channel is full or closed, and increments
    /// the dropped message counter.
    pub fn send(&self, message: Arc<String>) -> bool {
        if self.closing.is_cancelled() {
            return false;
        }
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            counter!(WS_SEND_DROPS_TOTAL).increment(1);
            false
        }
    }

    /// Queue a text frame, waiting while the queue is full.
    ///
    /// Returns `false` once a close has been requested or the writer is gone.
    pub async fn send_wait(&self, message: Arc<String>) -> bool {
        if self.closing.is_cancelled() {
            return false;
        }
        tokio::select! {
            () = self.closing.cancelled() => false,
            sent = self.tx.send(message) => sent.is_ok(),
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record inbound activity.
    pub fn mark_seen(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last inbound frame (or connection establishment).
    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Ask the session to close the socket with `reason`.
    ///
    /// Only the first request is kept. Returns `true` if this call set it.
    pub fn close(&self, reason: CloseReason) -> bool {
        {
            let mut slot = self.close_reason.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(reason);
        }
        self.closing.cancel();
        true
    }

    /// Reason recorded by [`close`](Self::close), if any.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.lock().clone()
    }

    /// Whether a close has been requested.
    pub fn is_closing(&self) -> bool {
        self.closing.is_cancelled()
    }

    /// Resolves once a close has been requested.
    pub fn closing(&self) -> impl Future<Output = ()> + Send + '_ {
        self.closing.cancelled()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[async_trait]
impl Outbound for ClientConnection {
    async fn send_text(&self, text: Arc<String>) -> bool {
        self.send_wait(text).await
    }
}
