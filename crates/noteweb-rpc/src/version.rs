//! Process-wide change version.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use noteweb_vault::ChangeSink;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 64;

/// Monotonic counter of vault mutations.
///
/// Starts at 0 and only ever moves up by one. Each new value is published
/// to subscribers in order.
pub struct ChangeVersion {
    current: AtomicU64,
    bump_lock: Mutex<()>,
    tx: broadcast::Sender<u64>,
}

impl ChangeVersion {
    /// A fresh oracle at version 0.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            current: AtomicU64::new(0),
            bump_lock: Mutex::new(()),
            tx,
        }
    }

    /// The current version.
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    /// Increment by one, publish, and return the new version.
    pub fn bump(&self) -> u64 {
        let _guard = self.bump_lock.lock();
        let version = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        // No subscribers is fine.
        let _ = self.tx.send(version);
        counter!("vault_change_bumps_total").increment(1);
        debug!(version, "change version bumped");
        version
    }

    /// Receive every version published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<u64> {
        self.tx.subscribe()
    }
}

impl Default for ChangeVersion {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeSink for ChangeVersion {
    fn vault_changed(&self) {
        let _ = self.bump();
    }
}
