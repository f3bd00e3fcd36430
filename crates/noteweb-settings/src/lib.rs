//! # noteweb-settings
//!
//! Configuration management with layered sources for the noteweb server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`NotewebSettings::default()`]
//! 2. **User file**: `~/.noteweb/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `NOTEWEB_*` overrides (highest priority)
//!
//! The binary applies its command-line flags on top of the loaded value.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, save_settings,
    settings_path,
};
pub use types::*;
