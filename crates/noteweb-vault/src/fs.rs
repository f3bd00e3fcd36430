//! Filesystem-backed [`NoteStore`].

use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::errors::StoreError;
use crate::store::{Entry, EntryKind, NOTE_EXTENSION, NoteFile, NoteStore, normalize_note_path};

/// A vault rooted at a directory on disk.
///
/// Hidden entries (names starting with `.`, e.g. `.obsidian`, `.git`) are
/// invisible: listing skips them and addressing one is an invalid path.
#[derive(Clone, Debug)]
pub struct FsVault {
    root: PathBuf,
}

impl FsVault {
    /// Open a vault. The root must be an existing directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let display = root.display().to_string();
        let meta = std::fs::metadata(&root).map_err(|e| StoreError::from_io(&display, e))?;
        if !meta.is_dir() {
            return Err(StoreError::NotAFolder(display));
        }
        let root = root
            .canonicalize()
            .map_err(|e| StoreError::from_io(&display, e))?;
        Ok(Self { root })
    }

    /// Absolute root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<(String, PathBuf), StoreError> {
        let rel = normalize_note_path(path)?;
        if rel.split('/').any(is_hidden_name) {
            return Err(StoreError::InvalidPath(path.to_owned()));
        }
        let abs = self.root.join(&rel);
        Ok((rel, abs))
    }
}

#[async_trait]
impl NoteStore for FsVault {
    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn list_notes(&self) -> Result<Vec<NoteFile>, StoreError> {
        let root = self.root.clone();
        let notes = tokio::task::spawn_blocking(move || scan_notes(&root))
            .await
            .map_err(|e| StoreError::Io {
                path: String::new(),
                source: std::io::Error::other(e),
            })?;
        debug!(count = notes.len(), "listed notes");
        Ok(notes)
    }

    async fn stat(&self, path: &str) -> Result<Option<Entry>, StoreError> {
        let (rel, abs) = self.resolve(path)?;
        match tokio::fs::metadata(&abs).await {
            Ok(meta) => Ok(Some(Entry {
                kind: if meta.is_dir() {
                    EntryKind::Folder
                } else {
                    EntryKind::File
                },
                mtime: mtime_millis(&meta),
                path: rel,
            })),
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                Ok(None)
            }
            Err(e) => Err(StoreError::from_io(&rel, e)),
        }
    }

    async fn read(&self, path: &str) -> Result<String, StoreError> {
        let (rel, abs) = self.resolve(path)?;
        let bytes = tokio::fs::read(&abs)
            .await
            .map_err(|e| StoreError::from_io(&rel, e))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn create_folder(&self, path: &str) -> Result<(), StoreError> {
        let (rel, abs) = self.resolve(path)?;
        tokio::fs::create_dir(&abs)
            .await
            .map_err(|e| StoreError::from_io(&rel, e))?;
        debug!(path = %rel, "folder created");
        Ok(())
    }

    async fn write_new(&self, path: &str, contents: &str) -> Result<NoteFile, StoreError> {
        let (rel, abs) = self.resolve(path)?;
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&abs)
            .await
            .map_err(|e| StoreError::from_io(&rel, e))?;
        file.write_all(contents.as_bytes())
            .await
            .map_err(|e| StoreError::from_io(&rel, e))?;
        file.flush().await.map_err(|e| StoreError::from_io(&rel, e))?;
        let meta = file
            .metadata()
            .await
            .map_err(|e| StoreError::from_io(&rel, e))?;
        debug!(path = %rel, bytes = contents.len(), "note written");
        Ok(NoteFile {
            path: rel,
            mtime: mtime_millis(&meta),
        })
    }
}

fn scan_notes(root: &Path) -> Vec<NoteFile> {
    let mut notes: Vec<NoteFile> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(error = %e, "skipping unreadable vault entry");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let rel = relative_path(root, e.path())?;
            if !rel.ends_with(NOTE_EXTENSION) {
                return None;
            }
            let mtime = e.metadata().map_or(0, |m| mtime_millis(&m));
            Some(NoteFile { path: rel, mtime })
        })
        .collect();
    notes.sort_by(|a, b| a.path.cmp(&b.path));
    notes
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = rel
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    Some(parts.join("/"))
}

fn is_hidden(name: &OsStr) -> bool {
    name.to_str().is_some_and(is_hidden_name)
}

fn is_hidden_name(name: &str) -> bool {
    name.starts_with('.')
}

fn mtime_millis(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .map_or(0, |t| DateTime::<Utc>::from(t).timestamp_millis())
}
