//! The note-store surface the RPC handlers depend on.

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::StoreError;

/// File extension that marks a note.
pub const NOTE_EXTENSION: &str = ".md";

/// A note listed by the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NoteFile {
    /// Vault-relative path with `/` separators.
    pub path: String,
    /// Modification time, milliseconds since the Unix epoch.
    pub mtime: i64,
}

/// What a path points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    /// A regular file (note or otherwise).
    File,
    /// A folder.
    Folder,
}

/// Result of [`NoteStore::stat`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    /// Normalized vault-relative path.
    pub path: String,
    /// File or folder.
    pub kind: EntryKind,
    /// Modification time, milliseconds since the Unix epoch.
    pub mtime: i64,
}

impl Entry {
    /// A regular file with the note extension.
    pub fn is_note(&self) -> bool {
        self.kind == EntryKind::File && self.path.ends_with(NOTE_EXTENSION)
    }
}

/// Read/write access to the vault.
///
/// All paths are vault-relative; implementations reject anything that
/// escapes the root with [`StoreError::InvalidPath`].
#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Every note in the vault, sorted by path.
    async fn list_notes(&self) -> Result<Vec<NoteFile>, StoreError>;

    /// Look up a path. `Ok(None)` when nothing exists there.
    async fn stat(&self, path: &str) -> Result<Option<Entry>, StoreError>;

    /// Read a file as UTF-8 (lossy).
    async fn read(&self, path: &str) -> Result<String, StoreError>;

    /// Create a single folder. Fails if anything already exists at `path`.
    async fn create_folder(&self, path: &str) -> Result<(), StoreError>;

    /// Create a new file with `contents`. Fails if anything already exists.
    async fn write_new(&self, path: &str, contents: &str) -> Result<NoteFile, StoreError>;
}

/// Normalize a client-supplied vault-relative path.
///
/// Backslashes become `/`, `.` and empty segments are dropped. Absolute
/// paths, `..` segments and paths that normalize to nothing are rejected.
pub fn normalize_note_path(raw: &str) -> Result<String, StoreError> {
    let unified = raw.trim().replace('\\', "/");
    if unified.starts_with('/') {
        return Err(StoreError::InvalidPath(raw.to_owned()));
    }
    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => return Err(StoreError::InvalidPath(raw.to_owned())),
            s if s.contains(':') => return Err(StoreError::InvalidPath(raw.to_owned())),
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return Err(StoreError::InvalidPath(raw.to_owned()));
    }
    Ok(segments.join("/"))
}

/// File stem of a vault-relative path (`a/b/Note.md` → `Note`).
pub fn title_of(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.strip_suffix(NOTE_EXTENSION).unwrap_or(name).to_owned()
}

/// Parent folder of a vault-relative path, `""` at the root.
pub fn parent_of(path: &str) -> &str {
    path.rfind('/').map_or("", |idx| &path[..idx])
}
