use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use super::{DirEntry, EntryKind, Metadata, Storage, StorageWriter};
use crate::error::{read_error, write_error};
use crate::{Error, Result};

const MAX_LINK_HOPS: usize = 40;

/// Storage backed by the local filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalStorage;

impl LocalStorage {
    pub fn new() -> Self { Self }
}

struct LocalWriter {
    path: PathBuf,
    file: BufWriter<File>,
}

impl Write for LocalWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> { self.file.write(buf) }

    fn flush(&mut self) -> io::Result<()> { self.file.flush() }
}

impl StorageWriter for LocalWriter {
    fn commit(self: Box<Self>) -> Result<()> {
        let path = self.path;
        let file = self
            .file
            .into_inner()
            .map_err(|e| write_error(&path, e.into_error()))?;
        file.sync_all().map_err(|e| write_error(&path, e))
    }
}

fn kind_of(meta: &fs::Metadata) -> EntryKind {
    if meta.is_dir() {
        EntryKind::Directory
    } else {
        EntryKind::File
    }
}

impl Storage for LocalStorage {
    fn name(&self) -> &str { "local" }

    fn read(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let file = File::open(path).map_err(|e| read_error(path, e))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn create(&self, path: &Path) -> Result<Box<dyn StorageWriter>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| write_error(parent, e))?;
        }
        // Never write through a final symlink, dangling or not.
        if fs::symlink_metadata(path).is_ok_and(|meta| meta.file_type().is_symlink()) {
            let refused = io::Error::new(io::ErrorKind::InvalidInput, "refusing to write through a symlink");
            return Err(write_error(path, refused));
        }
        let file = File::create(path).map_err(|e| write_error(path, e))?;
        Ok(Box::new(LocalWriter {
            path: path.to_path_buf(),
            file: BufWriter::new(file),
        }))
    }

    fn list(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let reader = fs::read_dir(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::NotFound {
                path: path.to_path_buf(),
            },
            _ => Error::List {
                path:   path.to_path_buf(),
                source: e,
            },
        })?;

        let mut entries = Vec::new();
        for entry in reader {
            let entry = entry.map_err(|e| Error::List {
                path:   path.to_path_buf(),
                source: e,
            })?;
            let meta = entry.metadata().map_err(|e| read_error(entry.path(), e))?;
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                return Err(Error::NonUtf8 { path: entry.path() });
            };
            entries.push(DirEntry {
                name,
                kind: kind_of(&meta),
                size: meta.len(),
                modified: meta.modified().ok(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn stat(&self, path: &Path) -> Result<Option<Metadata>> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Some(Metadata {
                kind:     kind_of(&meta),
                size:     meta.len(),
                modified: meta.modified().ok(),
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(read_error(path, e)),
        }
    }

    fn delete(&self, path: &Path) -> Result<()> {
        let meta = fs::symlink_metadata(path).map_err(|e| read_error(path, e))?;
        let result = if meta.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        result.map_err(|e| Error::Delete {
            path:   path.to_path_buf(),
            source: e,
        })
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(|e| write_error(parent, e))?;
        }
        fs::rename(from, to).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::NotFound {
                path: from.to_path_buf(),
            },
            _ => Error::Rename {
                from:   from.to_path_buf(),
                to:     to.to_path_buf(),
                source: e,
            },
        })
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).map_err(|e| write_error(path, e))
    }

    fn canonicalize(&self, path: &Path) -> Result<PathBuf> {
        // Canonicalize the deepest existing ancestor, then re-attach the
        // components that do not exist yet. A dangling symlink is not a
        // missing component: its target is followed like any other link.
        let mut existing = path.to_path_buf();
        let mut pending = Vec::new();
        let mut hops = 0;
        loop {
            match fs::canonicalize(&existing) {
                Ok(resolved) => {
                    let mut out = resolved;
                    for part in pending.iter().rev() {
                        out.push(part);
                    }
                    return Ok(out);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    if fs::symlink_metadata(&existing).is_ok_and(|meta| meta.file_type().is_symlink()) {
                        hops += 1;
                        if hops > MAX_LINK_HOPS {
                            let looped = io::Error::new(io::ErrorKind::InvalidInput, "too many levels of symbolic links");
                            return Err(read_error(&existing, looped));
                        }
                        let target = fs::read_link(&existing).map_err(|e| read_error(&existing, e))?;
                        existing = match existing.parent() {
                            Some(parent) if target.is_relative() => parent.join(target),
                            _ => target,
                        };
                        continue;
                    }
                    let Some(Component::Normal(part)) = existing.components().next_back() else {
                        return Ok(path.to_path_buf());
                    };
                    pending.push(part.to_os_string());
                    if !existing.pop() {
                        return Ok(path.to_path_buf());
                    }
                }
                Err(e) => return Err(read_error(&existing, e)),
            }
        }
    }
}
