use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use super::{DirEntry, EntryKind, Metadata, Storage, StorageWriter};
use crate::{Error, Result};

#[derive(Clone, Debug)]
struct Blob {
    data:     Arc<Vec<u8>>,
    modified: SystemTime,
}

#[derive(Debug, Default)]
struct Tree {
    files: BTreeMap<PathBuf, Blob>,
    dirs:  BTreeSet<PathBuf>,
}

impl Tree {
    fn add_ancestors(&mut self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir.as_os_str().is_empty() {
                break;
            }
            self.dirs.insert(dir.to_path_buf());
            current = dir.parent();
        }
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.dirs.contains(path) || self.files.keys().any(|k| k != path && k.starts_with(path))
    }
}

/// Flat-key storage kept in memory, emulating an object store.
///
/// Writes become visible only on commit. `fail_paths_containing` injects
/// write and rename failures for any path containing the given needle.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tree:   Arc<RwLock<Tree>>,
    faults: RwLock<Vec<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self { Self::default() }

    pub fn fail_paths_containing(&self, needle: impl Into<String>) {
        self.faults.write().push(needle.into());
    }

    pub fn clear_faults(&self) { self.faults.write().clear(); }

    /// Every stored file path, sorted.
    pub fn paths(&self) -> Vec<PathBuf> { self.tree.read().files.keys().cloned().collect() }

    /// Override the modification time of a stored file.
    pub fn set_modified(&self, path: impl AsRef<Path>, modified: SystemTime) -> Result<()> {
        let path = path.as_ref();
        let mut tree = self.tree.write();
        let blob = tree.files.get_mut(path).ok_or_else(|| Error::NotFound {
            path: path.to_path_buf(),
        })?;
        blob.modified = modified;
        Ok(())
    }

    fn check_fault(&self, path: &Path) -> Result<()> {
        let text = path.to_string_lossy();
        if self.faults.read().iter().any(|n| text.contains(n.as_str())) {
            return Err(Error::Write {
                path:   path.to_path_buf(),
                source: io::Error::other("injected storage fault"),
            });
        }
        Ok(())
    }
}

struct MemoryWriter {
    path:   PathBuf,
    buffer: Vec<u8>,
    tree:   Arc<RwLock<Tree>>,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> { Ok(()) }
}

impl StorageWriter for MemoryWriter {
    fn commit(self: Box<Self>) -> Result<()> {
        let mut tree = self.tree.write();
        tree.add_ancestors(&self.path);
        tree.files.insert(self.path, Blob {
            data:     Arc::new(self.buffer),
            modified: SystemTime::now(),
        });
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn name(&self) -> &str { "memory" }

    fn read(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let tree = self.tree.read();
        let blob = tree.files.get(path).ok_or_else(|| Error::NotFound {
            path: path.to_path_buf(),
        })?;
        Ok(Box::new(Cursor::new(SharedBytes(blob.data.clone()))))
    }

    fn create(&self, path: &Path) -> Result<Box<dyn StorageWriter>> {
        self.check_fault(path)?;
        if self.tree.read().dirs.contains(path) {
            return Err(Error::AlreadyExists {
                path: path.to_path_buf(),
            });
        }
        Ok(Box::new(MemoryWriter {
            path:   path.to_path_buf(),
            buffer: Vec::new(),
            tree:   self.tree.clone(),
        }))
    }

    fn list(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let tree = self.tree.read();
        if !tree.is_dir(path) {
            return Err(Error::NotFound {
                path: path.to_path_buf(),
            });
        }

        let mut children: BTreeMap<String, DirEntry> = BTreeMap::new();
        for (key, blob) in tree.files.range(path.to_path_buf()..) {
            let Ok(rest) = key.strip_prefix(path) else {
                continue;
            };
            let mut parts = rest.components();
            let Some(first) = parts.next() else { continue };
            let name = first.as_os_str().to_string_lossy().into_owned();
            let entry = if parts.next().is_some() {
                DirEntry {
                    name:     name.clone(),
                    kind:     EntryKind::Directory,
                    size:     0,
                    modified: None,
                }
            } else {
                DirEntry {
                    name:     name.clone(),
                    kind:     EntryKind::File,
                    size:     blob.data.len() as u64,
                    modified: Some(blob.modified),
                }
            };
            children.entry(name).or_insert(entry);
        }
        for dir in tree.dirs.iter() {
            if dir.parent() == Some(path) {
                if let Some(name) = dir.file_name() {
                    let name = name.to_string_lossy().into_owned();
                    children.entry(name.clone()).or_insert(DirEntry {
                        name,
                        kind: EntryKind::Directory,
                        size: 0,
                        modified: None,
                    });
                }
            }
        }
        Ok(children.into_values().collect())
    }

    fn stat(&self, path: &Path) -> Result<Option<Metadata>> {
        let tree = self.tree.read();
        if let Some(blob) = tree.files.get(path) {
            return Ok(Some(Metadata {
                kind:     EntryKind::File,
                size:     blob.data.len() as u64,
                modified: Some(blob.modified),
            }));
        }
        if tree.is_dir(path) {
            return Ok(Some(Metadata {
                kind:     EntryKind::Directory,
                size:     0,
                modified: None,
            }));
        }
        Ok(None)
    }

    fn delete(&self, path: &Path) -> Result<()> {
        let mut tree = self.tree.write();
        if tree.files.remove(path).is_some() {
            return Ok(());
        }
        if !tree.is_dir(path) {
            return Err(Error::NotFound {
                path: path.to_path_buf(),
            });
        }
        tree.files.retain(|k, _| !k.starts_with(path));
        tree.dirs.retain(|d| !d.starts_with(path));
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        self.check_fault(to)?;
        let mut tree = self.tree.write();
        if let Some(blob) = tree.files.remove(from) {
            tree.add_ancestors(to);
            tree.files.insert(to.to_path_buf(), blob);
            return Ok(());
        }
        if !tree.is_dir(from) {
            return Err(Error::NotFound {
                path: from.to_path_buf(),
            });
        }

        let moved: Vec<(PathBuf, Blob)> = tree
            .files
            .iter()
            .filter(|(k, _)| k.starts_with(from))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let moved_dirs: Vec<PathBuf> = tree.dirs.iter().filter(|d| d.starts_with(from)).cloned().collect();
        tree.files.retain(|k, _| !k.starts_with(from));
        tree.dirs.retain(|d| !d.starts_with(from));

        for (key, blob) in moved {
            if let Ok(rest) = key.strip_prefix(from) {
                let target = to.join(rest);
                tree.add_ancestors(&target);
                tree.files.insert(target, blob);
            }
        }
        for dir in moved_dirs {
            if let Ok(rest) = dir.strip_prefix(from) {
                let target = to.join(rest);
                tree.add_ancestors(&target);
                tree.dirs.insert(target);
            }
        }
        tree.dirs.insert(to.to_path_buf());
        tree.add_ancestors(to);
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let mut tree = self.tree.write();
        if tree.files.contains_key(path) {
            return Err(Error::AlreadyExists {
                path: path.to_path_buf(),
            });
        }
        tree.dirs.insert(path.to_path_buf());
        tree.add_ancestors(path);
        Ok(())
    }
}

struct SharedBytes(Arc<Vec<u8>>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] { self.0.as_slice() }
}
