//! The storage capability consumed by the sandbox.
//!
//! A `Storage` knows nothing about path safety: every path it receives is
//! taken at face value. Callers go through [`crate::Sandbox`], which
//! validates paths once before delegating here.

mod local;
mod memory;

pub use local::LocalStorage;
pub use memory::MemoryStorage;

use std::fmt;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Metadata {
    pub kind:     EntryKind,
    pub size:     u64,
    pub modified: Option<SystemTime>,
}

impl Metadata {
    pub fn is_dir(&self) -> bool { self.kind == EntryKind::Directory }

    pub fn is_file(&self) -> bool { self.kind == EntryKind::File }
}

/// An immediate child of a listed directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name:     String,
    pub kind:     EntryKind,
    pub size:     u64,
    pub modified: Option<SystemTime>,
}

/// A streaming sink returned by [`Storage::create`].
///
/// Content is only guaranteed durable after `commit`. Dropping an
/// uncommitted writer leaves the target in a backend-specific state, so
/// callers stream into temporary names and rename afterwards.
pub trait StorageWriter: Write + Send {
    fn commit(self: Box<Self>) -> Result<()>;
}

/// Backend-agnostic file operations.
///
/// `rename` replaces an existing file at `to`. `delete` removes directories
/// recursively. `create` creates missing parent directories.
pub trait Storage: Send + Sync + fmt::Debug {
    /// Short backend label used in log records.
    fn name(&self) -> &str;

    fn read(&self, path: &Path) -> Result<Box<dyn Read + Send>>;

    fn create(&self, path: &Path) -> Result<Box<dyn StorageWriter>>;

    fn write(&self, path: &Path, content: &mut dyn Read) -> Result<u64> {
        let mut sink = self.create(path)?;
        let written = io::copy(content, &mut sink).map_err(|e| Error::Write {
            path:   path.to_path_buf(),
            source: e,
        })?;
        sink.commit()?;
        Ok(written)
    }

    fn list(&self, path: &Path) -> Result<Vec<DirEntry>>;

    fn stat(&self, path: &Path) -> Result<Option<Metadata>>;

    fn delete(&self, path: &Path) -> Result<()>;

    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Resolve backend-level indirections (symlinks) for the final prefix
    /// check. Backends without such indirections return the path unchanged.
    fn canonicalize(&self, path: &Path) -> Result<PathBuf> { Ok(path.to_path_buf()) }
}
