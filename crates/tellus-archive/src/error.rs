use std::io;

use tellus_fs::SecurityViolation;

use crate::data::{ArchiveId, AssemblyManifest, ExtractionReport};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    PathSecurity(SecurityViolation),

    #[error("archive '{archive_id}' failed integrity check: {reason}")]
    ArchiveIntegrity { archive_id: ArchiveId, reason: String },

    #[error(
        "extraction of '{}' incomplete: {} of {} files failed",
        report.archive_id,
        report.errors.len(),
        report.candidates
    )]
    PartialExtraction { report: Box<ExtractionReport> },

    #[error("conflict at '{path}' unresolved: {reason}")]
    ConflictUnresolved {
        path:     String,
        reason:   String,
        /// Decisions taken before the run stopped.
        manifest: Box<AssemblyManifest>,
    },

    #[error("{operation} cancelled")]
    Cancelled { operation: String },

    #[error("archive '{0}' already exists")]
    ArchiveExists(ArchiveId),

    #[error("archive '{0}' not found")]
    ArchiveNotFound(ArchiveId),

    #[error("sidecar of '{archive_id}' is invalid: {reason}")]
    SidecarInvalid { archive_id: ArchiveId, reason: String },

    #[error("source file '{path}' changed while it was archived")]
    SourceChanged { path: String },

    #[error("unknown simulation '{0}'")]
    SimulationNotFound(String),

    #[error("unknown storage location '{0}'")]
    LocationNotFound(String),

    #[error(transparent)]
    Storage(tellus_fs::Error),

    #[error("sidecar serialization failed: {0}")]
    Sidecar(#[from] serde_json::Error),

    #[error(transparent)]
    Classify(#[from] tellus_classify::Error),

    #[error("configuration error: {0}")]
    Config(Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub fn is_security(&self) -> bool { matches!(self, Self::PathSecurity(_)) }

    pub fn is_integrity(&self) -> bool { matches!(self, Self::ArchiveIntegrity { .. }) }

    pub fn is_cancelled(&self) -> bool { matches!(self, Self::Cancelled { .. }) }
}

impl From<tellus_fs::Error> for Error {
    fn from(e: tellus_fs::Error) -> Self {
        match e {
            tellus_fs::Error::Security(violation) => Self::PathSecurity(violation),
            other => Self::Storage(other),
        }
    }
}

impl From<SecurityViolation> for Error {
    fn from(v: SecurityViolation) -> Self { Self::PathSecurity(v) }
}

impl From<figment::Error> for Error {
    fn from(e: figment::Error) -> Self { Self::Config(Box::new(e)) }
}

pub type Result<T> = std::result::Result<T, Error>;
