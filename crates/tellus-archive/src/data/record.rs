use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tellus_classify::{ContentType, Importance};

/// One archived file. Immutable once the archive is sealed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// `/`-separated path relative to the archived root.
    pub path:         String,
    pub size:         u64,
    /// Lowercase hex SHA-256 of the content.
    pub checksum:     String,
    pub modified:     DateTime<Utc>,
    pub content_type: ContentType,
    pub importance:   Importance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date:         Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags:         BTreeSet<String>,
}

impl FileRecord {
    pub fn file_name(&self) -> &str { self.path.rsplit('/').next().unwrap_or(&self.path) }

    /// Parent directory, empty for top-level files.
    pub fn directory(&self) -> &str { self.path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("") }
}

const IGNORED_NAMES: &[&str] = &["Thumbs.db", ".DS_Store", "desktop.ini"];

/// Whether a walked file belongs in an archive by default.
///
/// Hidden files and directories and OS droppings are left out.
pub fn is_archivable(path: &str) -> bool {
    path.split('/').all(|segment| !segment.starts_with('.') && !IGNORED_NAMES.contains(&segment))
}
