//! Vault error type.

use thiserror::Error;

/// Errors returned by a [`NoteStore`](crate::store::NoteStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The path is empty, absolute, or escapes the vault.
    #[error("invalid path: {0}")]
    InvalidPath(String),
    /// Nothing exists at the path.
    #[error("not found: {0}")]
    NotFound(String),
    /// Something already exists at the path.
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// A path segment that must be a folder is a file.
    #[error("not a folder: {0}")]
    NotAFolder(String),
    /// Underlying filesystem failure.
    #[error("i/o error on {path}: {source}")]
    Io {
        /// Vault-relative path being accessed.
        path: String,
        /// The original error.
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    /// Wrap an I/O error, mapping `NotFound`/`AlreadyExists` to their variants.
    pub fn from_io(path: &str, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.to_owned()),
            std::io::ErrorKind::AlreadyExists => Self::AlreadyExists(path.to_owned()),
            _ => Self::Io {
                path: path.to_owned(),
                source,
            },
        }
    }
}
