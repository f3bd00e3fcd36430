//! RPC dependency-injection context.

use std::sync::Arc;
use std::time::Instant;

use noteweb_settings::VaultSettings;
use noteweb_vault::NoteStore;

use crate::version::ChangeVersion;

/// Bounds applied by the domain handlers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandlerLimits {
    /// Lines in a `note.getPreview` excerpt.
    pub preview_lines: usize,
    /// `search.query` limit when none is given.
    pub search_default_limit: usize,
    /// Hard cap on `search.query` results.
    pub search_max_limit: usize,
}

impl Default for HandlerLimits {
    fn default() -> Self {
        Self {
            preview_lines: 20,
            search_default_limit: 50,
            search_max_limit: 200,
        }
    }
}

impl HandlerLimits {
    /// Limits from the vault settings section.
    pub fn from_settings(settings: &VaultSettings) -> Self {
        Self {
            preview_lines: settings.preview_lines,
            search_default_limit: settings.search_default_limit,
            search_max_limit: settings.search_max_limit,
        }
    }
}

/// Shared context passed to every RPC handler.
pub struct RpcContext {
    /// Note storage.
    pub store: Arc<dyn NoteStore>,
    /// Change-version oracle.
    pub versions: Arc<ChangeVersion>,
    /// Handler bounds.
    pub limits: HandlerLimits,
    /// When the server started (for uptime calculation).
    pub server_start_time: Instant,
}

impl RpcContext {
    /// Build a context with the current instant as start time.
    pub fn new(
        store: Arc<dyn NoteStore>,
        versions: Arc<ChangeVersion>,
        limits: HandlerLimits,
    ) -> Self {
        Self {
            store,
            versions,
            limits,
            server_start_time: Instant::now(),
        }
    }
}
