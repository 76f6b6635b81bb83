use serde::{Deserialize, Serialize};

use super::archive::ArchiveId;
use crate::{Error, Result};

/// A candidate that could not be written in non-atomic mode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileError {
    pub path:    String,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub archive_id: ArchiveId,
    pub candidates: usize,
    pub extracted:  usize,
    pub skipped:    usize,
    pub bytes:      u64,
    /// Destination paths written, in body order.
    pub files:      Vec<String>,
    pub errors:     Vec<FileError>,
}

impl ExtractionReport {
    pub fn new(archive_id: ArchiveId, candidates: usize) -> Self {
        Self {
            archive_id,
            candidates,
            extracted: 0,
            skipped: 0,
            bytes: 0,
            files: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool { self.errors.is_empty() }

    /// Turn per-file failures into a [`Error::PartialExtraction`].
    pub fn into_result(self) -> Result<Self> {
        if self.errors.is_empty() {
            Ok(self)
        } else {
            Err(Error::PartialExtraction {
                report: Box::new(self),
            })
        }
    }
}

/// Outcome of re-reading an archive body against its sidecar.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub archive_id: ArchiveId,
    pub checked:    usize,
    pub problems:   Vec<String>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool { self.problems.is_empty() }
}
