//! # noteweb-vault
//!
//! The note-store collaborator behind the RPC handlers.
//!
//! - [`store::NoteStore`]: async read/write surface the handlers depend on
//! - [`fs::FsVault`]: filesystem implementation rooted at a vault folder
//! - [`markdown`]: titles, tags, links and excerpts from note text
//! - [`graph`]: node/edge snapshot with link resolution
//! - [`watcher`]: coalesced filesystem change signals

#![deny(unsafe_code)]

pub mod errors;
pub mod fs;
pub mod graph;
pub mod markdown;
pub mod store;
pub mod watcher;

pub use errors::StoreError;
pub use fs::FsVault;
pub use graph::{Edge, GraphSnapshot, LinkResolver, Node, build_snapshot};
pub use store::{
    Entry, EntryKind, NOTE_EXTENSION, NoteFile, NoteStore, normalize_note_path, parent_of, title_of,
};
pub use watcher::{ChangeSink, VaultWatcher};
