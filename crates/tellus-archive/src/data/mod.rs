mod archive;
mod filter;
mod manifest;
mod record;
mod report;
mod sidecar;

pub use archive::{ArchiveId, ArchiveInfo, ArchiveKind, Codec};
pub use filter::{CompiledFilter, DateSelector, ExtractionFilter};
pub use manifest::{
    AssemblyManifest, AssemblyMode, ConflictStrategy, Decision, DecisionBasis, ManifestEntry, Outcome,
};
pub use record::{FileRecord, is_archivable};
pub use report::{ExtractionReport, FileError, VerifyReport};
pub use sidecar::{DateRange, ExtractionHints, FragmentDescriptor, Inventory, METADATA_VERSION, Sidecar};
