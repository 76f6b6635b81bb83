use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::archive::ArchiveId;
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    #[default]
    NewestWins,
    LargestWins,
    FirstWins,
    MergeDirectoriesOnly,
    SkipConflicts,
    Interactive,
}

impl ConflictStrategy {
    pub const ALL: [ConflictStrategy; 6] = [
        Self::NewestWins,
        Self::LargestWins,
        Self::FirstWins,
        Self::MergeDirectoriesOnly,
        Self::SkipConflicts,
        Self::Interactive,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewestWins => "newest-wins",
            Self::LargestWins => "largest-wins",
            Self::FirstWins => "first-wins",
            Self::MergeDirectoriesOnly => "merge-directories-only",
            Self::SkipConflicts => "skip-conflicts",
            Self::Interactive => "interactive",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for ConflictStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s.trim())
            .ok_or_else(|| Error::Validation(format!("unknown conflict strategy '{s}'")))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssemblyMode {
    /// Plain directory merge in list order.
    #[default]
    Merge,
    /// Fragments ordered by the start of their date range.
    Temporal,
    /// Files placed under a directory named after their content type.
    ContentType,
}

/// Why a destination path ended up the way it did.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionBasis {
    NoConflict,
    Newest,
    Largest,
    First,
    Skipped,
    Interactive,
}

impl fmt::Display for DecisionBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoConflict => "no conflict",
            Self::Newest => "newest",
            Self::Largest => "largest",
            Self::First => "first",
            Self::Skipped => "skipped",
            Self::Interactive => "interactive",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Written,
    Replaced,
    KeptExisting,
}

impl Outcome {
    pub fn writes(self) -> bool { !matches!(self, Self::KeptExisting) }
}

/// One resolution step, in the order it was taken.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub path:        String,
    pub archive_id:  ArchiveId,
    pub source_path: String,
    pub basis:       DecisionBasis,
    pub outcome:     Outcome,
}

/// Provenance of a file written by the assembly run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub archive_id:  ArchiveId,
    pub source_path: String,
    pub basis:       DecisionBasis,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyManifest {
    pub strategy:  ConflictStrategy,
    pub mode:      AssemblyMode,
    /// Destination path → the archive whose copy is in place.
    pub files:     BTreeMap<String, ManifestEntry>,
    pub decisions: Vec<Decision>,
}

impl AssemblyManifest {
    pub fn new(strategy: ConflictStrategy, mode: AssemblyMode) -> Self {
        Self {
            strategy,
            mode,
            files: BTreeMap::new(),
            decisions: Vec::new(),
        }
    }

    /// Append a decision; written outcomes take over the destination entry.
    pub fn record(&mut self, decision: Decision) {
        if decision.outcome.writes() {
            self.files.insert(decision.path.clone(), ManifestEntry {
                archive_id:  decision.archive_id.clone(),
                source_path: decision.source_path.clone(),
                basis:       decision.basis,
            });
        }
        self.decisions.push(decision);
    }

    pub fn entry(&self, path: &str) -> Option<&ManifestEntry> { self.files.get(path) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(path: &str, archive: &str, basis: DecisionBasis, outcome: Outcome) -> Decision {
        Decision {
            path: path.into(),
            archive_id: ArchiveId::new(archive).unwrap(),
            source_path: path.into(),
            basis,
            outcome,
        }
    }

    #[test]
    fn strategies_parse_from_kebab_case() {
        for strategy in ConflictStrategy::ALL {
            assert_eq!(strategy.as_str().parse::<ConflictStrategy>().unwrap(), strategy);
        }
        assert!("random".parse::<ConflictStrategy>().is_err());
    }

    #[test]
    fn manifest_keeps_one_entry_per_destination() {
        let mut manifest = AssemblyManifest::new(ConflictStrategy::NewestWins, AssemblyMode::Merge);
        manifest.record(decision("a.nc", "f1", DecisionBasis::NoConflict, Outcome::Written));
        manifest.record(decision("a.nc", "f2", DecisionBasis::Newest, Outcome::Replaced));
        manifest.record(decision("a.nc", "f3", DecisionBasis::Newest, Outcome::KeptExisting));

        assert_eq!(manifest.files.len(), 1);
        assert_eq!(manifest.entry("a.nc").unwrap().archive_id.as_str(), "f2");
        assert_eq!(manifest.decisions.len(), 3);
        assert_eq!(DecisionBasis::Newest.to_string(), "newest");
    }
}
