//! Write-to-temporary then rename primitives over a [`Sandbox`].
//!
//! Content is streamed to a sibling named `.{name}.{uuid}.tellus-partial`,
//! committed, and renamed over the target. Readers see either the old file
//! or the complete new one.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::storage::StorageWriter;
use crate::{Error, Result, Sandbox};

pub const PARTIAL_SUFFIX: &str = ".tellus-partial";

/// Temporary sibling name for `path`.
pub fn partial_path(path: &str) -> String {
    let (parent, name) = match path.rsplit_once('/') {
        Some((parent, name)) => (Some(parent), name),
        None => (None, path),
    };
    let staged = format!(".{name}.{}{PARTIAL_SUFFIX}", uuid::Uuid::new_v4().simple());
    match parent {
        Some(parent) => format!("{parent}/{staged}"),
        None => staged,
    }
}

pub fn is_partial(name: &str) -> bool { name.ends_with(PARTIAL_SUFFIX) }

/// A file being written under a temporary name.
///
/// `publish` renames it over the target. Dropping it unpublished deletes
/// the temporary.
pub struct StagedFile {
    sandbox: Sandbox,
    target:  String,
    staged:  String,
    writer:  Option<Box<dyn StorageWriter>>,
    written: u64,
}

impl StagedFile {
    pub fn new(sandbox: &Sandbox, target: impl Into<String>) -> Result<Self> {
        let target = target.into();
        // Validate the target before anything touches storage.
        sandbox.resolve(&target)?;
        let staged = partial_path(&target);
        let writer = sandbox.create(&staged)?;
        Ok(Self {
            sandbox: sandbox.clone(),
            target,
            staged,
            writer: Some(writer),
            written: 0,
        })
    }

    pub fn target(&self) -> &str { &self.target }

    pub fn staged(&self) -> &str { &self.staged }

    pub fn written(&self) -> u64 { self.written }

    /// Commit the content and atomically move it over the target.
    pub fn publish(mut self) -> Result<u64> {
        let writer = self.writer.take().ok_or_else(|| Error::Write {
            path:   PathBuf::from(&self.staged),
            source: io::Error::other("staged file already published"),
        })?;
        writer.commit()?;
        self.sandbox.rename(&self.staged, &self.target)?;
        debug!(target = %self.target, bytes = self.written, "published staged file");
        self.staged.clear();
        Ok(self.written)
    }

    /// Drop the temporary without touching the target.
    pub fn discard(mut self) { self.cleanup(); }

    fn cleanup(&mut self) {
        self.writer.take();
        if !self.staged.is_empty() {
            let staged = std::mem::take(&mut self.staged);
            if let Err(err) = self.sandbox.delete(&staged) {
                if !err.is_not_found() {
                    debug!(path = %staged, error = %err, "failed to remove staged file");
                }
            }
        }
    }
}

impl Write for StagedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::other("staged file already published"))?;
        let n = writer.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) { self.cleanup(); }
}

/// Replace `path` with `content` in one step.
pub fn atomic_write(sandbox: &Sandbox, path: impl AsRef<Path>, content: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let target = path.to_str().ok_or_else(|| Error::NonUtf8 {
        path: path.to_path_buf(),
    })?;
    let mut staged = StagedFile::new(sandbox, target)?;
    staged.write_all(content).map_err(|e| Error::Write {
        path:   path.to_path_buf(),
        source: e,
    })?;
    staged.publish()?;
    Ok(())
}

/// Read the whole file at `path`.
pub fn read_all(sandbox: &Sandbox, path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let mut content = Vec::new();
    io::copy(&mut sandbox.read(path)?, &mut content).map_err(|e| Error::Read {
        path:   path.to_path_buf(),
        source: e,
    })?;
    Ok(content)
}
