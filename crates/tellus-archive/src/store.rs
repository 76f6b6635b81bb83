//! Archives and sidecars at one storage location.
//!
//! Layout, all siblings at the location root:
//!
//! - `<id>.json`: the sidecar, published last
//! - `<id>.tar.gz` / `<id>.tar.zst`: compressed body
//! - `<id>.tar.gz.000`, `.001`, ...: split body parts
//! - `<id>.d/`: organized body
//! - `<id>.flagged`: integrity flag with the failure reason

use std::io::Read;

use tellus_fs::primitives::is_partial;
use tellus_fs::{EntryKind, Sandbox, atomic_write, read_all};
use tracing::{debug, error};

use crate::codec::{ChainedParts, Decoder, part_name};
use crate::data::{ArchiveId, ArchiveInfo, ArchiveKind, Codec, Sidecar};
use crate::{Error, Result};

const SIDECAR_EXT: &str = ".json";
const FLAG_EXT: &str = ".flagged";

#[derive(Clone, Debug)]
pub struct ArchiveStore {
    location: String,
    sandbox:  Sandbox,
}

impl ArchiveStore {
    pub fn new(location: impl Into<String>, sandbox: Sandbox) -> Self {
        Self {
            location: location.into(),
            sandbox,
        }
    }

    pub fn location(&self) -> &str { &self.location }

    pub fn sandbox(&self) -> &Sandbox { &self.sandbox }

    pub fn sidecar_name(id: &ArchiveId) -> String { format!("{id}{SIDECAR_EXT}") }

    pub fn body_name(id: &ArchiveId, codec: Codec) -> String { format!("{id}.{}", codec.extension()) }

    pub fn organized_dir(id: &ArchiveId) -> String { format!("{id}.d") }

    fn flag_name(id: &ArchiveId) -> String { format!("{id}{FLAG_EXT}") }

    /// Whether anything, sidecar or body, is stored under `id`.
    pub fn exists(&self, id: &ArchiveId) -> Result<bool> {
        let mut names = vec![Self::sidecar_name(id), Self::organized_dir(id)];
        for codec in [Codec::Gzip, Codec::Zstd] {
            let body = Self::body_name(id, codec);
            names.push(part_name(&body, 0));
            names.push(body);
        }
        for name in names {
            if self.sandbox.exists(&name)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn load(&self, id: &ArchiveId) -> Result<Sidecar> {
        let bytes = match read_all(&self.sandbox, Self::sidecar_name(id)) {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Err(Error::ArchiveNotFound(id.clone())),
            Err(e) => return Err(e.into()),
        };
        let sidecar = Sidecar::from_json(&bytes)?;
        if sidecar.archive.id != *id {
            return Err(Error::SidecarInvalid {
                archive_id: id.clone(),
                reason:     format!("sidecar describes '{}'", sidecar.archive.id),
            });
        }
        Ok(sidecar)
    }

    /// Publish the sidecar atomically.
    pub fn save(&self, sidecar: &Sidecar) -> Result<()> {
        let json = sidecar.to_json()?;
        atomic_write(&self.sandbox, Self::sidecar_name(&sidecar.archive.id), &json)?;
        Ok(())
    }

    /// Ids of every archive with a published sidecar, sorted.
    pub fn list(&self) -> Result<Vec<ArchiveId>> {
        let entries = match self.sandbox.list("") {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        for entry in entries {
            if entry.kind != EntryKind::File || is_partial(&entry.name) {
                continue;
            }
            let Some(stem) = entry.name.strip_suffix(SIDECAR_EXT) else {
                continue;
            };
            match ArchiveId::new(stem) {
                Ok(id) => ids.push(id),
                Err(_) => debug!(name = %entry.name, "ignoring foreign file in archive location"),
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// The stored body bytes, parts chained for split archives.
    pub fn open_raw(&self, info: &ArchiveInfo) -> Result<Box<dyn Read + Send>> {
        let body = Self::body_name(&info.id, info.codec);
        match info.kind {
            ArchiveKind::Compressed => Ok(self.sandbox.read(&body)?),
            ArchiveKind::Split => {
                for index in 0..info.parts as usize {
                    if !self.sandbox.exists(part_name(&body, index))? {
                        return Err(Error::ArchiveIntegrity {
                            archive_id: info.id.clone(),
                            reason:     format!("missing body part {index}"),
                        });
                    }
                }
                let names = (0..info.parts as usize).map(|i| part_name(&body, i));
                Ok(Box::new(ChainedParts::new(&self.sandbox, names)))
            }
            ArchiveKind::Organized => Err(Error::Validation(format!(
                "organized archive '{}' has no stream body",
                info.id
            ))),
        }
    }

    /// The decompressed tar stream of a compressed or split archive.
    pub fn open_stream(&self, info: &ArchiveInfo) -> Result<Decoder<Box<dyn Read + Send>>> {
        let raw = self.open_raw(info)?;
        info.codec.decoder(raw).map_err(|e| Error::ArchiveIntegrity {
            archive_id: info.id.clone(),
            reason:     e.to_string(),
        })
    }

    /// One member of an organized archive.
    pub fn open_member(&self, info: &ArchiveInfo, path: &str) -> Result<Box<dyn Read + Send>> {
        let member = format!("{}/{path}", Self::organized_dir(&info.id));
        Ok(self.sandbox.read(member)?)
    }

    /// Remove the sidecar first, then the body.
    pub fn delete(&self, id: &ArchiveId) -> Result<()> {
        let sidecar = self.load(id)?;
        self.sandbox.delete(Self::sidecar_name(id))?;
        let info = &sidecar.archive;
        let body = Self::body_name(id, info.codec);
        let mut names = match info.kind {
            ArchiveKind::Compressed => vec![body],
            ArchiveKind::Split => (0..info.parts as usize).map(|i| part_name(&body, i)).collect(),
            ArchiveKind::Organized => vec![Self::organized_dir(id)],
        };
        names.push(Self::flag_name(id));
        for name in names {
            match self.sandbox.delete(&name) {
                Err(e) if !e.is_not_found() => return Err(e.into()),
                _ => {}
            }
        }
        Ok(())
    }

    /// Mark an archive as failing integrity checks. The archive itself
    /// is left untouched.
    pub fn flag(&self, id: &ArchiveId, reason: &str) -> Result<()> {
        error!(archive = %id, reason, "archive flagged");
        atomic_write(&self.sandbox, Self::flag_name(id), reason.as_bytes())?;
        Ok(())
    }

    pub fn flag_reason(&self, id: &ArchiveId) -> Result<Option<String>> {
        match read_all(&self.sandbox, Self::flag_name(id)) {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{FileRecord, METADATA_VERSION};
    use chrono::Utc;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use tellus_classify::{ContentType, Importance};
    use tellus_fs::MemoryStorage;

    fn store() -> ArchiveStore {
        let sandbox = Sandbox::new(Arc::new(MemoryStorage::new()), "/archives").unwrap();
        ArchiveStore::new("mem", sandbox)
    }

    fn sidecar(id: &str) -> Sidecar {
        let info = ArchiveInfo {
            id:            ArchiveId::new(id).unwrap(),
            kind:          ArchiveKind::Compressed,
            codec:         Codec::Gzip,
            location:      "mem".into(),
            created:       Utc::now(),
            simulation_id: None,
            description:   None,
            version:       None,
            tags:          BTreeSet::new(),
            parts:         1,
            body_size:     0,
            body_checksum: None,
        };
        let record = FileRecord {
            path:         "a.nc".into(),
            size:         0,
            checksum:     tellus_verify::sha256_hex(b""),
            modified:     Utc::now(),
            content_type: ContentType::Output,
            importance:   Importance::Important,
            date:         None,
            tags:         BTreeSet::new(),
        };
        Sidecar::build(info, vec![record], BTreeSet::new())
    }

    #[test]
    fn save_load_list() -> Result<()> {
        let store = store();
        let id = ArchiveId::new("b")?;
        assert!(matches!(store.load(&id), Err(Error::ArchiveNotFound(_))));

        store.save(&sidecar("b"))?;
        store.save(&sidecar("a"))?;
        let listed: Vec<_> = store.list()?.iter().map(|i| i.to_string()).collect();
        assert_eq!(listed, vec!["a", "b"]);

        let loaded = store.load(&id)?;
        assert_eq!(loaded.metadata_version, METADATA_VERSION);
        assert!(store.exists(&id)?);
        Ok(())
    }

    #[test]
    fn sidecar_under_wrong_name_is_invalid() -> Result<()> {
        let store = store();
        let json = sidecar("a").to_json()?;
        atomic_write(store.sandbox(), "b.json", &json)?;
        let err = store.load(&ArchiveId::new("b")?).unwrap_err();
        assert!(matches!(err, Error::SidecarInvalid { .. }));
        Ok(())
    }

    #[test]
    fn flags_are_kept_beside_the_archive() -> Result<()> {
        let store = store();
        let id = ArchiveId::new("a")?;
        assert_eq!(store.flag_reason(&id)?, None);
        store.flag(&id, "checksum mismatch")?;
        assert_eq!(store.flag_reason(&id)?.as_deref(), Some("checksum mismatch"));
        assert!(store.list()?.is_empty());
        Ok(())
    }
}
