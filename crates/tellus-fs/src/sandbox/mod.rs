//! Path sandbox: confines every operation to an immutable base path.
//!
//! Resolution: decode escapes, normalize separators, strip leading
//! separators, reject drive prefixes and `..`, join with the base, let the
//! backend canonicalize, and require the base as a prefix of the result.
//! Nothing falls back to an unsandboxed path.

mod decode;

use std::fmt;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::warn;

use crate::storage::{DirEntry, EntryKind, Metadata, Storage, StorageWriter};
use crate::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViolationKind {
    NulByte,
    Traversal,
    DrivePrefix,
    Encoding(&'static str),
    /// The path names the sandbox root where an entry is required.
    Root,
    Escape { resolved: PathBuf },
    InvalidBase,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NulByte => f.write_str("contains a NUL byte"),
            Self::Traversal => f.write_str("contains a parent-directory segment"),
            Self::DrivePrefix => f.write_str("carries a drive or device prefix"),
            Self::Encoding(why) => write!(f, "undecodable escape ({why})"),
            Self::Root => f.write_str("names the sandbox root"),
            Self::Escape { resolved } => write!(f, "resolves outside the base to '{}'", resolved.display()),
            Self::InvalidBase => f.write_str("base path must be absolute and free of '..'"),
        }
    }
}

/// A path rejected by the sandbox.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("path security violation: '{path}' {kind}")]
pub struct SecurityViolation {
    pub path: String,
    pub kind: ViolationKind,
}

impl SecurityViolation {
    fn new(path: &str, kind: ViolationKind) -> Self {
        Self {
            path: path.to_owned(),
            kind,
        }
    }
}

/// Turn an untrusted relative path into clean `/`-free segments.
///
/// Absolute prefixes (`/`, `\`) are stripped; `..` and dot-only segments are
/// rejected. The result never contains empty, `.` or `..` segments.
///
/// Escapes are decoded only to be checked: a path whose decoded form would
/// traverse is rejected, but the segments handed on are the raw ones, so a
/// file literally named `data%20v2.nc` stays that file.
pub fn sanitize_segments(raw: &str) -> std::result::Result<Vec<String>, SecurityViolation> {
    let violation = |kind| SecurityViolation::new(raw, kind);

    if raw.contains('\0') {
        return Err(violation(ViolationKind::NulByte));
    }
    let decoded = decode::decode_fully(raw).map_err(violation)?;
    if decoded != raw {
        split_checked(&decoded).map_err(violation)?;
    }
    split_checked(raw).map_err(violation)
}

fn split_checked(path: &str) -> std::result::Result<Vec<String>, ViolationKind> {
    if path.contains('\0') {
        return Err(ViolationKind::NulByte);
    }
    let unified = path.replace('\\', "/");
    let trimmed = unified.trim_start_matches('/');

    let bytes = trimmed.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return Err(ViolationKind::DrivePrefix);
    }

    let mut segments = Vec::new();
    for segment in trimmed.split('/') {
        match segment {
            "" | "." => continue,
            s if s.chars().all(|c| c == '.' || c == ' ') => return Err(ViolationKind::Traversal),
            s => segments.push(s.to_owned()),
        }
    }
    Ok(segments)
}

/// Join sanitized segments back into a relative `/`-separated path.
pub fn normalize_relative(raw: &str) -> std::result::Result<String, SecurityViolation> {
    Ok(sanitize_segments(raw)?.join("/"))
}

/// Filesystem view confined to `base` on some [`Storage`].
///
/// Stateless beyond the base path and cheap to clone; safe to share across
/// threads without synchronization.
#[derive(Clone)]
pub struct Sandbox {
    base:    PathBuf,
    storage: Arc<dyn Storage>,
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("base", &self.base)
            .field("storage", &self.storage.name())
            .finish()
    }
}

/// A file found by [`Sandbox::walk`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalkEntry {
    /// `/`-separated path relative to the walked directory.
    pub path:     String,
    pub size:     u64,
    pub modified: Option<std::time::SystemTime>,
}

impl Sandbox {
    pub fn new(storage: Arc<dyn Storage>, base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        let display = base.to_string_lossy().into_owned();
        if !base.is_absolute() {
            return Err(SecurityViolation::new(&display, ViolationKind::InvalidBase).into());
        }

        let mut clean = PathBuf::new();
        for component in base.components() {
            match component {
                Component::ParentDir => {
                    return Err(SecurityViolation::new(&display, ViolationKind::InvalidBase).into());
                }
                Component::CurDir => {}
                other => clean.push(other.as_os_str()),
            }
        }
        Ok(Self {
            base: clean,
            storage,
        })
    }

    pub fn base(&self) -> &Path { &self.base }

    pub fn storage(&self) -> &Arc<dyn Storage> { &self.storage }

    /// Resolve a path naming an entry strictly below the base.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf> { self.confine(path.as_ref(), true) }

    /// Resolve a path that may name the base itself (for `list`/`stat`).
    pub fn resolve_dir(&self, path: impl AsRef<Path>) -> Result<PathBuf> { self.confine(path.as_ref(), false) }

    fn confine(&self, path: &Path, strict: bool) -> Result<PathBuf> {
        let raw = path.to_str().ok_or_else(|| Error::NonUtf8 {
            path: path.to_path_buf(),
        })?;
        let segments = sanitize_segments(raw).inspect_err(|v| warn!(path = raw, reason = %v.kind, "sandbox rejected path"))?;
        if strict && segments.is_empty() {
            return Err(SecurityViolation::new(raw, ViolationKind::Root).into());
        }

        let mut joined = self.base.clone();
        joined.extend(segments.iter());

        let canonical_base = self.storage.canonicalize(&self.base)?;
        let canonical = self.storage.canonicalize(&joined)?;
        let inside = canonical.starts_with(&canonical_base) && (!strict || canonical != canonical_base);
        if !inside {
            let violation = SecurityViolation::new(raw, ViolationKind::Escape { resolved: canonical });
            warn!(path = raw, reason = %violation.kind, "sandbox rejected path");
            return Err(violation.into());
        }
        Ok(canonical)
    }

    /// A narrower sandbox rooted at `path` below this one.
    pub fn sub(&self, path: impl AsRef<Path>) -> Result<Sandbox> {
        let base = self.resolve(path)?;
        Ok(Self {
            base,
            storage: self.storage.clone(),
        })
    }

    pub fn read(&self, path: impl AsRef<Path>) -> Result<Box<dyn Read + Send>> {
        let resolved = self.resolve(path)?;
        self.storage.read(&resolved)
    }

    pub fn create(&self, path: impl AsRef<Path>) -> Result<Box<dyn StorageWriter>> {
        let resolved = self.resolve(path)?;
        self.storage.create(&resolved)
    }

    pub fn write(&self, path: impl AsRef<Path>, content: &mut dyn Read) -> Result<u64> {
        let resolved = self.resolve(path)?;
        self.storage.write(&resolved, content)
    }

    pub fn list(&self, path: impl AsRef<Path>) -> Result<Vec<DirEntry>> {
        let resolved = self.resolve_dir(path)?;
        self.storage.list(&resolved)
    }

    pub fn stat(&self, path: impl AsRef<Path>) -> Result<Option<Metadata>> {
        let resolved = self.resolve_dir(path)?;
        self.storage.stat(&resolved)
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> Result<bool> { Ok(self.stat(path)?.is_some()) }

    pub fn delete(&self, path: impl AsRef<Path>) -> Result<()> {
        let resolved = self.resolve(path)?;
        self.storage.delete(&resolved)
    }

    pub fn rename(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<()> {
        let from = self.resolve(from)?;
        let to = self.resolve(to)?;
        self.storage.rename(&from, &to)
    }

    pub fn create_dir_all(&self, path: impl AsRef<Path>) -> Result<()> {
        let resolved = self.resolve_dir(path)?;
        self.storage.create_dir_all(&resolved)
    }

    /// Recursively list files below `path`, sorted by relative path.
    pub fn walk(&self, path: impl AsRef<Path>) -> Result<Vec<WalkEntry>> {
        let root = path.as_ref().to_str().ok_or_else(|| Error::NonUtf8 {
            path: path.as_ref().to_path_buf(),
        })?;
        let root = normalize_relative(root)?;

        let mut files = Vec::new();
        let mut pending = vec![String::new()];
        while let Some(dir) = pending.pop() {
            let listed = join_relative(&root, &dir);
            for entry in self.list(&listed)? {
                let relative = join_relative(&dir, &entry.name);
                match entry.kind {
                    EntryKind::Directory => pending.push(relative),
                    EntryKind::File => files.push(WalkEntry {
                        path:     relative,
                        size:     entry.size,
                        modified: entry.modified,
                    }),
                }
            }
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }
}

/// Join two `/`-separated relative paths, either of which may be empty.
pub fn join_relative(left: &str, right: &str) -> String {
    match (left.is_empty(), right.is_empty()) {
        (true, _) => right.to_owned(),
        (_, true) => left.to_owned(),
        _ => format!("{left}/{right}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn sandbox() -> Sandbox {
        let storage = Arc::new(MemoryStorage::new());
        Sandbox::new(storage, "/data/sim").unwrap()
    }

    fn rejected(sandbox: &Sandbox, path: &str) -> ViolationKind {
        match sandbox.resolve(path) {
            Err(Error::Security(v)) => v.kind,
            other => panic!("expected a violation for {path:?}, got {other:?}"),
        }
    }

    #[test]
    fn plain_paths_resolve_under_base() {
        let sb = sandbox();
        assert_eq!(sb.resolve("output/a.nc").unwrap(), Path::new("/data/sim/output/a.nc"));
        assert_eq!(sb.resolve("./output//a.nc").unwrap(), Path::new("/data/sim/output/a.nc"));
    }

    #[test]
    fn absolute_prefixes_are_stripped() {
        let sb = sandbox();
        assert_eq!(sb.resolve("/etc/passwd").unwrap(), Path::new("/data/sim/etc/passwd"));
        assert_eq!(sb.resolve(r"\\server\share\x").unwrap(), Path::new("/data/sim/server/share/x"));
    }

    #[test]
    fn traversal_is_rejected_in_every_encoding() {
        let sb = sandbox();
        for path in [
            "../x",
            "a/../../x",
            r"a\..\x",
            "%2e%2e/x",
            "%2E%2E%2Fx",
            "%252e%252e/x",
            "\u{FF0E}\u{FF0E}/x",
            r"\u002e\u002e/x",
            "&#46;&#46;/x",
            ".../x",
            ". ./x",
        ] {
            assert_eq!(rejected(&sb, path), ViolationKind::Traversal, "{path}");
        }
    }

    #[test]
    fn drive_prefix_and_nul_are_rejected() {
        let sb = sandbox();
        assert_eq!(rejected(&sb, r"C:\Windows\x"), ViolationKind::DrivePrefix);
        assert_eq!(rejected(&sb, "a\0b"), ViolationKind::NulByte);
        assert_eq!(rejected(&sb, "a%00b"), ViolationKind::NulByte);
    }

    #[test]
    fn root_requires_dir_resolution() {
        let sb = sandbox();
        assert_eq!(rejected(&sb, ""), ViolationKind::Root);
        assert_eq!(rejected(&sb, "/"), ViolationKind::Root);
        assert_eq!(sb.resolve_dir("").unwrap(), Path::new("/data/sim"));
    }

    #[test]
    fn relative_base_is_refused() {
        let storage = Arc::new(MemoryStorage::new());
        assert!(Sandbox::new(storage.clone(), "relative/base").is_err());
        assert!(Sandbox::new(storage, "/data/../etc").is_err());
    }

    #[test]
    fn sub_sandbox_stays_inside_parent() {
        let sb = sandbox();
        let sub = sb.sub("dest").unwrap();
        assert_eq!(sub.base(), Path::new("/data/sim/dest"));
        assert!(sub.resolve("../x").is_err());
    }

    #[test]
    fn escaped_names_are_delegated_verbatim() {
        let sb = sandbox();
        assert_eq!(sb.resolve("output/data%20v2.nc").unwrap(), Path::new("/data/sim/output/data%20v2.nc"));
        assert_eq!(sb.resolve("caf&#233;.log").unwrap(), Path::new("/data/sim/caf&#233;.log"));
        assert_eq!(normalize_relative("a/%2e%2e").unwrap_err().kind, ViolationKind::Traversal);
    }

    #[test]
    fn walk_lists_files_recursively() {
        let sb = sandbox();
        sb.write("b/c.nc", &mut &b"c"[..]).unwrap();
        sb.write("a.log", &mut &b"a"[..]).unwrap();
        sb.write("b/d/e.nml", &mut &b"e"[..]).unwrap();

        let paths: Vec<_> = sb.walk("").unwrap().into_iter().map(|e| e.path).collect();
        assert_eq!(paths, vec!["a.log", "b/c.nc", "b/d/e.nml"]);
    }
}
