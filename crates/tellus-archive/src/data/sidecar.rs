//! The sidecar document: the single source of truth for planning.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tellus_classify::ContentType;

use super::archive::ArchiveInfo;
use super::record::FileRecord;
use crate::{Error, Result};

pub const METADATA_VERSION: &str = "1.0";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end:   NaiveDate,
}

/// How this archive contributes to its simulation's file set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range:    Option<DateRange>,
    pub content_types: BTreeSet<ContentType>,
    pub directories:   BTreeSet<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub file_count:          usize,
    pub total_size:          u64,
    pub content_type_counts: BTreeMap<ContentType, usize>,
    /// Sorted by path, in body order.
    pub files:               Vec<FileRecord>,
}

/// Hints for building filters. Not authoritative.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionHints {
    pub patterns:      Vec<String>,
    pub content_types: Vec<ContentType>,
    pub date_formats:  Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sidecar {
    pub metadata_version: String,
    pub archive:          ArchiveInfo,
    pub fragment:         FragmentDescriptor,
    pub inventory:        Inventory,
    #[serde(default)]
    pub extraction:       ExtractionHints,
}

impl Sidecar {
    /// Derive the fragment, inventory and hint sections from `files`.
    pub fn build(archive: ArchiveInfo, mut files: Vec<FileRecord>, date_formats: BTreeSet<String>) -> Self {
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let mut fragment = FragmentDescriptor::default();
        let mut counts = BTreeMap::new();
        let mut top_level = BTreeSet::new();
        for record in &files {
            fragment.content_types.insert(record.content_type);
            *counts.entry(record.content_type).or_insert(0) += 1;

            let dir = record.directory();
            if !dir.is_empty() {
                fragment.directories.insert(dir.to_owned());
                if let Some(top) = dir.split('/').next() {
                    top_level.insert(format!("{top}/**"));
                }
            }
            if let Some(date) = record.date {
                fragment.date_range = Some(match fragment.date_range {
                    None => DateRange { start: date, end: date },
                    Some(range) => DateRange {
                        start: range.start.min(date),
                        end:   range.end.max(date),
                    },
                });
            }
        }

        let inventory = Inventory {
            file_count: files.len(),
            total_size: files.iter().map(|r| r.size).sum(),
            content_type_counts: counts,
            files,
        };
        let extraction = ExtractionHints {
            patterns:      top_level.into_iter().collect(),
            content_types: fragment.content_types.iter().copied().collect(),
            date_formats:  date_formats.into_iter().collect(),
        };
        Self {
            metadata_version: METADATA_VERSION.to_owned(),
            archive,
            fragment,
            inventory,
            extraction,
        }
    }

    pub fn files(&self) -> &[FileRecord] { &self.inventory.files }

    pub fn record(&self, path: &str) -> Option<&FileRecord> {
        self.inventory
            .files
            .binary_search_by(|r| r.path.as_str().cmp(path))
            .ok()
            .map(|i| &self.inventory.files[i])
    }

    pub fn to_json(&self) -> Result<Vec<u8>> { Ok(serde_json::to_vec_pretty(self)?) }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let sidecar: Self = serde_json::from_slice(bytes)?;
        sidecar.validate()?;
        Ok(sidecar)
    }

    /// Structural checks: known schema version, sorted unique paths, and
    /// inventory totals consistent with the records.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Error::SidecarInvalid {
            archive_id: self.archive.id.clone(),
            reason,
        };

        let major = self.metadata_version.split('.').next().unwrap_or("");
        if major != "1" {
            return Err(invalid(format!("unsupported metadata version {}", self.metadata_version)));
        }
        let files = &self.inventory.files;
        if let Some(pair) = files.windows(2).find(|w| w[0].path >= w[1].path) {
            return Err(invalid(format!("records not sorted or duplicated at '{}'", pair[1].path)));
        }
        if let Some(bad) = files.iter().find(|r| tellus_fs::normalize_relative(&r.path).ok().as_deref() != Some(r.path.as_str())) {
            return Err(invalid(format!("record path '{}' is not a clean relative path", bad.path)));
        }
        if self.inventory.file_count != files.len() {
            return Err(invalid(format!(
                "file count {} does not match {} records",
                self.inventory.file_count,
                files.len()
            )));
        }
        let total: u64 = files.iter().map(|r| r.size).sum();
        if self.inventory.total_size != total {
            return Err(invalid(format!(
                "total size {} does not match records ({total})",
                self.inventory.total_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ArchiveId, ArchiveKind, Codec};
    use chrono::{DateTime, Utc};
    use tellus_classify::Importance;

    fn record(path: &str, content_type: ContentType, date: Option<NaiveDate>) -> FileRecord {
        FileRecord {
            path: path.into(),
            size: 10,
            checksum: "00".into(),
            modified: DateTime::<Utc>::from(std::time::SystemTime::UNIX_EPOCH),
            content_type,
            importance: Importance::Important,
            date,
            tags: BTreeSet::new(),
        }
    }

    fn info() -> ArchiveInfo {
        ArchiveInfo {
            id:            ArchiveId::new("frag-1").unwrap(),
            kind:          ArchiveKind::Compressed,
            codec:         Codec::Gzip,
            location:      "local".into(),
            created:       DateTime::<Utc>::from(std::time::SystemTime::UNIX_EPOCH),
            simulation_id: Some("sim-1".into()),
            description:   None,
            version:       None,
            tags:          BTreeSet::new(),
            parts:         1,
            body_size:     0,
            body_checksum: None,
        }
    }

    fn ymd(y: i32, m: u32, d: u32) -> Option<NaiveDate> { NaiveDate::from_ymd_opt(y, m, d) }

    #[test]
    fn build_derives_fragment_and_inventory() {
        let sidecar = Sidecar::build(
            info(),
            vec![
                record("output/b.nc", ContentType::Output, ymd(2001, 3, 1)),
                record("run.log", ContentType::Log, None),
                record("output/a.nc", ContentType::Output, ymd(2000, 1, 1)),
            ],
            BTreeSet::from(["%Y".to_string()]),
        );

        let paths: Vec<_> = sidecar.files().iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["output/a.nc", "output/b.nc", "run.log"]);
        assert_eq!(sidecar.inventory.total_size, 30);
        assert_eq!(sidecar.inventory.content_type_counts[&ContentType::Output], 2);
        assert_eq!(sidecar.fragment.date_range, Some(DateRange {
            start: ymd(2000, 1, 1).unwrap(),
            end:   ymd(2001, 3, 1).unwrap(),
        }));
        assert_eq!(sidecar.extraction.patterns, vec!["output/**"]);
        assert!(sidecar.record("run.log").is_some());
        assert!(sidecar.record("missing").is_none());
    }

    #[test]
    fn json_round_trip_keeps_schema_sections() {
        let sidecar = Sidecar::build(info(), vec![record("a.nc", ContentType::Output, None)], BTreeSet::new());
        let json = sidecar.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        for key in ["metadata_version", "archive", "fragment", "inventory", "extraction"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(Sidecar::from_json(&json).unwrap(), sidecar);
    }

    #[test]
    fn tampered_inventory_is_rejected() {
        let mut sidecar = Sidecar::build(info(), vec![record("a.nc", ContentType::Output, None)], BTreeSet::new());
        sidecar.inventory.file_count = 2;
        let json = serde_json::to_vec(&sidecar).unwrap();
        assert!(matches!(Sidecar::from_json(&json), Err(Error::SidecarInvalid { .. })));
    }

    #[test]
    fn traversal_in_records_is_rejected() {
        let mut sidecar = Sidecar::build(info(), vec![record("a.nc", ContentType::Output, None)], BTreeSet::new());
        sidecar.inventory.files[0].path = "../a.nc".into();
        assert!(sidecar.validate().is_err());
    }
}
