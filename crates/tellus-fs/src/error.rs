use std::io;
use std::path::PathBuf;

use crate::sandbox::SecurityViolation;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("path not found: '{path}'")]
    NotFound { path: PathBuf },

    #[error("already exists: '{path}'")]
    AlreadyExists { path: PathBuf },

    #[error("failed to read '{path}': {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write '{path}': {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to list '{path}': {source}")]
    List { path: PathBuf, source: io::Error },

    #[error("failed to delete '{path}': {source}")]
    Delete { path: PathBuf, source: io::Error },

    #[error("failed to rename '{from}' to '{to}': {source}")]
    Rename {
        from:   PathBuf,
        to:     PathBuf,
        source: io::Error,
    },

    #[error("path is not valid UTF-8: '{path}'")]
    NonUtf8 { path: PathBuf },

    #[error(transparent)]
    Security(#[from] SecurityViolation),
}

impl Error {
    /// Whether this error is a sandbox boundary violation.
    pub fn is_security(&self) -> bool { matches!(self, Self::Security(_)) }

    pub fn is_not_found(&self) -> bool { matches!(self, Self::NotFound { .. }) }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Map a read-side io error, keeping `NotFound` distinguishable.
pub fn read_error(path: impl Into<PathBuf>, err: io::Error) -> Error {
    let path = path.into();
    match err.kind() {
        io::ErrorKind::NotFound => Error::NotFound { path },
        _ => Error::Read { path, source: err },
    }
}

pub fn write_error(path: impl Into<PathBuf>, err: io::Error) -> Error {
    let path = path.into();
    match err.kind() {
        io::ErrorKind::AlreadyExists => Error::AlreadyExists { path },
        _ => Error::Write { path, source: err },
    }
}
