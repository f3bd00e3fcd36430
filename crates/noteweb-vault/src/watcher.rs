//! Filesystem watcher that turns vault mutations into change signals.
//!
//! Raw `notify` events are filtered (hidden paths and access/metadata
//! events are ignored) and coalesced: a burst of events inside the debounce
//! window produces exactly one [`ChangeSink::vault_changed`] call.

use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Duration;

use notify::event::{EventKind, ModifyKind};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Receives coalesced vault change signals.
pub trait ChangeSink: Send + Sync + 'static {
    /// Something in the vault changed.
    fn vault_changed(&self);
}

/// Active watch on a vault root. Dropping it stops watching.
pub struct VaultWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl VaultWatcher {
    /// Watch `root` recursively, signalling `sink` once per debounced burst.
    pub fn start(
        root: &Path,
        debounce: Duration,
        sink: Arc<dyn ChangeSink>,
    ) -> Result<Self, notify::Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watch_root = root.to_path_buf();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if is_relevant(&watch_root, &event) {
                    let _ = tx.send(());
                }
            }
            Err(e) => warn!(error = %e, "vault watch error"),
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        info!(root = %root.display(), debounce_ms = debounce.as_millis(), "watching vault");

        let task = tokio::spawn(debounce_loop(rx, debounce, sink));
        Ok(Self {
            _watcher: watcher,
            task,
        })
    }
}

impl Drop for VaultWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Coalesce signals from `rx`. A burst lasts `window` from its first event,
/// so a continuous stream fires once per window.
async fn debounce_loop(
    mut rx: mpsc::UnboundedReceiver<()>,
    window: Duration,
    sink: Arc<dyn ChangeSink>,
) {
    while rx.recv().await.is_some() {
        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);
        let mut closed = false;
        loop {
            tokio::select! {
                () = &mut deadline => break,
                more = rx.recv() => {
                    if more.is_none() {
                        closed = true;
                        break;
                    }
                }
            }
        }
        debug!("vault changed");
        sink.vault_changed();
        if closed {
            return;
        }
    }
}

fn is_relevant(root: &Path, event: &Event) -> bool {
    match event.kind {
        EventKind::Access(_) | EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(_) => {
            event.paths.iter().any(|p| !is_hidden_path(root, p))
        }
        // Unclassified backend events (including path-less rescans) may hide
        // a real mutation.
        EventKind::Any | EventKind::Other => {
            event.paths.is_empty() || event.paths.iter().any(|p| !is_hidden_path(root, p))
        }
    }
}

fn is_hidden_path(root: &Path, path: &Path) -> bool {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components().any(|c| match c {
        Component::Normal(name) => name.to_str().is_some_and(|n| n.starts_with('.')),
        _ => false,
    })
}
