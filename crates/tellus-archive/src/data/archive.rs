use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Globally unique archive identifier, also the stem of its file names.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArchiveId(String);

impl ArchiveId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let valid = !id.is_empty()
            && id.len() <= 128
            && !id.starts_with('.')
            && id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(Error::Validation(format!("invalid archive id '{id}'")));
        }
        Ok(Self(id))
    }

    pub fn generate() -> Self { Self(uuid::Uuid::new_v4().simple().to_string()) }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for ArchiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl FromStr for ArchiveId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> { Self::new(s) }
}

impl TryFrom<String> for ArchiveId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> { Self::new(value) }
}

impl From<ArchiveId> for String {
    fn from(id: ArchiveId) -> Self { id.0 }
}

/// Physical layout of an archive body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    /// One compressed tar stream.
    #[default]
    Compressed,
    /// The compressed stream cut into numbered parts.
    Split,
    /// A plain directory tree with random access per file.
    Organized,
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Compressed => "compressed",
            Self::Split => "split",
            Self::Organized => "organized",
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Gzip,
    Zstd,
}

impl Codec {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Gzip => "tar.gz",
            Self::Zstd => "tar.zst",
        }
    }
}

/// Identity section of a sidecar.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArchiveInfo {
    pub id:            ArchiveId,
    pub kind:          ArchiveKind,
    #[serde(default)]
    pub codec:         Codec,
    /// Name of the storage location holding the archive.
    pub location:      String,
    pub created:       DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description:   Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version:       Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags:          BTreeSet<String>,
    /// Number of body parts; 1 unless split.
    #[serde(default = "one")]
    pub parts:         u32,
    /// Size of the stored body in bytes, compressed where applicable.
    pub body_size:     u64,
    /// SHA-256 over the stored body bytes, absent for organized archives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_checksum: Option<String>,
}

fn one() -> u32 { 1 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_ids_are_file_name_safe() {
        assert!(ArchiveId::new("run-01.fragment_a").is_ok());
        assert!(ArchiveId::new("").is_err());
        assert!(ArchiveId::new("../x").is_err());
        assert!(ArchiveId::new(".hidden").is_err());
        assert!(ArchiveId::new("a/b").is_err());
        assert_eq!(ArchiveId::generate().as_str().len(), 32);
    }

    #[test]
    fn archive_id_deserialization_validates() {
        assert!(serde_json::from_str::<ArchiveId>("\"ok-1\"").is_ok());
        assert!(serde_json::from_str::<ArchiveId>("\"bad/id\"").is_err());
    }

    #[test]
    fn codec_extensions() {
        assert_eq!(Codec::Gzip.extension(), "tar.gz");
        assert_eq!(Codec::Zstd.extension(), "tar.zst");
    }
}
