//! Change bridge: forwards change-version bumps to every live session as
//! `graph.changed` notifications.

use std::sync::Arc;

use noteweb_rpc::ChangeVersion;
use serde_json::json;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::broadcast::SessionSet;

/// Method name of the change notification.
pub const GRAPH_CHANGED: &str = "graph.changed";

/// Bridges the version channel to connected clients.
pub struct ChangeBridge {
    rx: broadcast::Receiver<u64>,
    versions: Arc<ChangeVersion>,
    sessions: Arc<SessionSet>,
}

impl ChangeBridge {
    /// Subscribe to `versions` and fan out to `sessions`.
    pub fn new(versions: Arc<ChangeVersion>, sessions: Arc<SessionSet>) -> Self {
        Self {
            rx: versions.subscribe(),
            versions,
            sessions,
        }
    }

    /// Run until `cancel` fires or the version sender is dropped.
    #[tracing::instrument(skip_all, name = "change_bridge")]
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let received = tokio::select! {
                () = cancel.cancelled() => break,
                received = self.rx.recv() => received,
            };
            match received {
                Ok(version) => self.publish(version).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Skipped versions collapse into the latest one.
                    let version = self.versions.current();
                    tracing::warn!(lagged = n, version, "change bridge lagged");
                    self.publish(version).await;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("change bridge: sender closed, exiting");
                    break;
                }
            }
        }
    }

    async fn publish(&self, version: u64) {
        let delivered = self
            .sessions
            .broadcast(GRAPH_CHANGED, Some(json!({ "version": version })))
            .await;
        tracing::debug!(version, delivered, "graph change published");
    }
}
